use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

static NEXT_CONNECTION_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-unique key for one accepted connection. A reconnect always gets
/// a new token, even when it ends up with the same player ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionToken(pub u64);

impl ConnectionToken {
    fn next() -> Self {
        ConnectionToken(NEXT_CONNECTION_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionToken),
    #[error("write to connection {0} timed out after {1:?}")]
    Timeout(ConnectionToken, Duration),
}

#[derive(Debug)]
struct HandleInner {
    token: ConnectionToken,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<String>,
    closed: watch::Sender<bool>,
}

/// Capability for one live connection, independent of the transport.
///
/// Writers push encoded frames onto a bounded outbound queue that the
/// session's writer task drains into the socket. Closing only flips a
/// signal, so it is safe to call while holding the registry lock.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

/// Session-owned ends of a handle's queue and close signal
#[derive(Debug)]
pub struct ConnectionIo {
    pub outbound: mpsc::Receiver<String>,
    pub closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    pub fn new(peer: Option<SocketAddr>, outbound_capacity: usize) -> (Self, ConnectionIo) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                token: ConnectionToken::next(),
                peer,
                outbound: outbound_tx,
                closed: closed_tx,
            }),
        };
        let io = ConnectionIo {
            outbound: outbound_rx,
            closed: closed_rx,
        };
        (handle, io)
    }

    pub fn token(&self) -> ConnectionToken {
        self.inner.token
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Remote address for log lines
    pub fn peer_label(&self) -> String {
        self.peer()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Queues one frame, waiting at most `deadline` for queue space
    pub async fn send(&self, frame: String, deadline: Duration) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed(self.token()));
        }

        self.inner
            .outbound
            .send_timeout(frame, deadline)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    SendError::Timeout(self.token(), deadline)
                }
                mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed(self.token()),
            })
    }

    /// Signals the owning session to shut the connection down. Idempotent.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow() || self.inner.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let (a, _io_a) = ConnectionHandle::new(None, 4);
        let (b, _io_b) = ConnectionHandle::new(None, 4);

        assert_ne!(a.token(), b.token());
        assert_eq!(a.clone().token(), a.token());
    }

    #[test]
    fn test_peer_label() {
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        let (known, _io_known) = ConnectionHandle::new(Some(addr), 4);
        let (unknown, _io_unknown) = ConnectionHandle::new(None, 4);

        assert_eq!(known.peer(), Some(addr));
        assert_eq!(known.peer_label(), "10.0.0.7:51234");
        assert_eq!(unknown.peer_label(), "unknown");
    }

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let (handle, mut io) = ConnectionHandle::new(None, 4);

        handle
            .send("hello".to_string(), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(io.outbound.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_send_times_out_when_queue_full() {
        let (handle, _io) = ConnectionHandle::new(None, 1);

        handle
            .send("first".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        let result = handle
            .send("second".to_string(), Duration::from_millis(10))
            .await;

        assert_eq!(
            result,
            Err(SendError::Timeout(handle.token(), Duration::from_millis(10)))
        );
    }

    #[tokio::test]
    async fn test_close_is_observed_and_idempotent() {
        let (handle, mut io) = ConnectionHandle::new(None, 4);
        assert!(!handle.is_closed());

        handle.close();
        handle.close();

        assert!(handle.is_closed());
        io.closed.changed().await.unwrap();
        assert!(*io.closed.borrow());

        let result = handle.send("late".to_string(), Duration::from_millis(10)).await;
        assert_eq!(result, Err(SendError::Closed(handle.token())));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let (handle, io) = ConnectionHandle::new(None, 4);
        drop(io);

        assert!(handle.is_closed());
        let result = handle.send("x".to_string(), Duration::from_millis(10)).await;
        assert_eq!(result, Err(SendError::Closed(handle.token())));
    }
}
