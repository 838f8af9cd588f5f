//! Per-connection session handling
//!
//! Each accepted WebSocket runs one session through these stages:
//! - Connecting: assign an identity and register a fresh record
//! - Synced: send the client its own record, then every other player
//! - Active: read, decode and validate moves until the connection ends
//! - Closed: deregister and shut the socket, whichever way the session ended
//!
//! Outbound traffic from the dispatcher goes through the connection handle's
//! queue and a dedicated writer task, so this session is the only reader and
//! the writer task the only writer of its socket.

use crate::connection::{ConnectionHandle, ConnectionIo};
use crate::dispatcher::{PublishError, Publisher};
use crate::identity::IdentityGenerator;
use crate::registry::{ConnectionRegistry, PlayerRecord};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use shared::{decode_message, encode_message, MoveMessage, PlayerState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, timeout_at, Instant};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub sync_timeout: Duration,
    pub outbound_capacity: usize,
}

/// Shared collaborators every session needs
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub publisher: Publisher,
    pub identities: Arc<IdentityGenerator>,
    pub config: SessionConfig,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("write failed: {0}")]
    Write(axum::Error),
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("read failed: {0}")]
    Read(axum::Error),
    #[error("no message received within {0:?}")]
    ReadTimeout(Duration),
    #[error("connection closed by the server")]
    Evicted,
    #[error(transparent)]
    Dispatcher(#[from] PublishError),
}

/// What an inbound payload turned out to be
#[derive(Debug)]
pub enum Inbound {
    Move(MoveMessage),
    Unsupported(String),
    Malformed(serde_json::Error),
}

/// Decodes a client payload on behalf of `player_id`
///
/// Moves are re-stamped with the session's own identity so a client can
/// never move someone else.
pub fn interpret(payload: &[u8], player_id: &str) -> Inbound {
    match decode_message(payload) {
        Ok(msg) if msg.is_move() => Inbound::Move(msg.with_player_id(player_id)),
        Ok(msg) => Inbound::Unsupported(msg.kind),
        Err(e) => Inbound::Malformed(e),
    }
}

/// Deregisters and closes the connection on every exit path
struct SessionGuard {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.handle.close();
        self.registry.delete(self.handle.token());
    }
}

/// Drives one upgraded WebSocket from handshake to teardown
pub async fn run_session(socket: WebSocket, peer: Option<SocketAddr>, ctx: SessionContext) {
    let (mut sink, mut stream) = socket.split();
    let config = ctx.config;

    let player_id = ctx.identities.generate();
    let (handle, io) = ConnectionHandle::new(peer, config.outbound_capacity);
    let ConnectionIo { outbound, closed } = io;

    let _guard = match open_session(&mut sink, &handle, &ctx, &player_id).await {
        Ok(guard) => guard,
        Err(e) => {
            warn!("Error sending initial state to {}: {}", player_id, e);
            return;
        }
    };
    info!(
        "New player connected: {} from {}, total players: {}",
        player_id,
        handle.peer_label(),
        ctx.registry.len()
    );

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        closed.clone(),
        handle.clone(),
        config.write_timeout,
    ));

    match read_loop(&mut stream, &handle, closed, &ctx, &player_id).await {
        Ok(()) => info!("Player {} closed the connection", player_id),
        Err(SessionError::Evicted) => info!("Connection for player {} closed by server", player_id),
        Err(e) => warn!("Error reading message from {}: {}", player_id, e),
    }

    handle.close();
    if let Err(e) = writer.await {
        warn!("Writer task for {} failed: {}", player_id, e);
    }
}

/// Registers a fresh record for `player_id` and sends the initial sync
///
/// The returned guard owns the registration. When the client's own record
/// cannot be delivered the guard is dropped here, which closes the handle
/// and removes the entry again.
async fn open_session<S>(
    sink: &mut S,
    handle: &ConnectionHandle,
    ctx: &SessionContext,
    player_id: &str,
) -> Result<SessionGuard, SessionError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let record = PlayerRecord::new(player_id);
    let initial = PlayerState::new(record.id.clone(), record.x, record.y);
    ctx.registry.add(handle.clone(), record);
    let guard = SessionGuard {
        registry: Arc::clone(&ctx.registry),
        handle: handle.clone(),
    };

    send_initial_sync(sink, ctx, &initial).await?;
    Ok(guard)
}

/// Sends the client its own record, then one move per existing peer
async fn send_initial_sync<S>(
    sink: &mut S,
    ctx: &SessionContext,
    initial: &PlayerState,
) -> Result<(), SessionError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let deadline = ctx.config.sync_timeout;
    write_frame(sink, encode_message(initial)?, deadline).await?;

    let peers: Vec<PlayerRecord> = ctx
        .registry
        .snapshot()
        .into_iter()
        .filter(|peer| peer.id != initial.id)
        .collect();
    debug!(
        "Sending {} existing players to new player {}",
        peers.len(),
        initial.id
    );

    for peer in peers {
        let msg = MoveMessage::new(peer.id, peer.x, peer.y);
        let result = match encode_message(&msg) {
            Ok(frame) => write_frame(sink, frame, deadline).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Error sending existing player {} data: {}", msg.player_id, e);
        }
    }

    Ok(())
}

async fn write_frame<S>(sink: &mut S, frame: String, deadline: Duration) -> Result<(), SessionError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match timeout(deadline, sink.send(Message::Text(frame))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Write(e)),
        Err(_) => Err(SessionError::WriteTimeout(deadline)),
    }
}

/// Resolves once the handle's close signal is raised
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    mut closed: watch::Receiver<bool>,
    handle: ConnectionHandle,
    write_timeout: Duration,
) where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = closed_signal(&mut closed) => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut sink, frame, write_timeout).await {
                    warn!("Error writing to connection {}: {}", handle.token(), e);
                    handle.close();
                    break;
                }
            }
        }
    }

    // Best effort; the peer may already be gone
    let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
}

async fn read_loop<S>(
    stream: &mut S,
    handle: &ConnectionHandle,
    mut closed: watch::Receiver<bool>,
    ctx: &SessionContext,
    player_id: &str,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let read_timeout = ctx.config.read_timeout;
    let mut deadline = Instant::now() + read_timeout;

    loop {
        let next = tokio::select! {
            _ = closed_signal(&mut closed) => return Err(SessionError::Evicted),
            next = timeout_at(deadline, stream.next()) => next,
        };

        let payload = match next {
            Err(_) => return Err(SessionError::ReadTimeout(read_timeout)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(SessionError::Read(e)),
            Ok(Some(Ok(Message::Text(text)))) => text.into_bytes(),
            Ok(Some(Ok(Message::Binary(data)))) => data,
            Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            // Control frames keep the current deadline; only data re-arms it
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
        };
        deadline = Instant::now() + read_timeout;

        match interpret(&payload, player_id) {
            Inbound::Move(event) => {
                debug!(
                    "Received move from {}: ({:.2}, {:.2})",
                    player_id, event.x, event.y
                );
                ctx.registry.update(handle.token(), event.x, event.y);
                ctx.publisher.publish(event).await?;
            }
            Inbound::Unsupported(kind) => {
                info!("Ignoring message with unknown type: {:?}", kind);
            }
            Inbound::Malformed(e) => {
                warn!(
                    "Error parsing message from {}: {}, raw message: {}",
                    player_id,
                    e,
                    String::from_utf8_lossy(&payload)
                );
            }
        }
    }
}
