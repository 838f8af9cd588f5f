//! # Position Relay Server Library
//!
//! This library provides a real-time position relay for multiplayer clients.
//! Clients connect over WebSocket, receive a server-assigned identity, and
//! stream 2D position updates that the server relays to every other player.
//!
//! ## Core Responsibilities
//!
//! ### Connection Registry
//! Tracks every live connection and its player record behind a single lock:
//! - Registration with duplicate-identity takeover
//! - Position and liveness updates
//! - Idempotent removal on disconnect
//! - Snapshots for newly connected clients and the status page
//!
//! ### Broadcast Fan-out
//! A single dispatcher drains validated moves in FIFO order and delivers each
//! one to every peer except the mover. Each delivery is bounded by a write
//! deadline, and a slow or dead peer never holds up the others.
//!
//! ### Session Handling
//! Each connection is synced with its own record plus every existing player,
//! then read until it closes. Inbound moves are re-stamped with the session's
//! own identity, so a client can never move another player.
//!
//! ### Idle Eviction
//! A periodic sweeper removes connections that have not sent a valid move
//! within the stale timeout, covering half-open clients whose reads never
//! fail on their own.
//!
//! ## Concurrency Model
//!
//! One task per connection (plus a writer task), one dispatcher task and one
//! sweeper task share a single [`ConnectionRegistry`]. The registry lock is
//! never held across network I/O: the dispatcher copies its recipient list
//! under the lock and writes afterwards, and closing a connection only raises
//! a signal that its own session acts on.
//!
//! ## Module Organization
//!
//! - `identity`: random hex player identities with a clock-based fallback
//! - `connection`: transport-independent connection handles
//! - `registry`: the shared connection registry
//! - `dispatcher`: move event fan-out
//! - `session`: per-connection protocol handling
//! - `sweeper`: idle connection eviction
//! - `status`: HTML status page rendering
//! - `network`: HTTP routes, listener and background task wiring
//! - `config`: server settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::BoxError> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Serves /game (WebSocket) and /status (HTML) until the listener fails
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod identity;
pub mod network;
pub mod registry;
pub mod session;
pub mod status;
pub mod sweeper;

pub use config::ServerConfig;
pub use connection::{ConnectionHandle, ConnectionToken};
pub use dispatcher::{BroadcastDispatcher, BroadcastReport, Publisher};
pub use identity::IdentityGenerator;
pub use network::{BoxError, Server};
pub use registry::{ConnectionRegistry, PlayerRecord};
pub use sweeper::IdleSweeper;
