//! Connection registry: the single source of truth for who is connected
//!
//! This module tracks every live connection together with its player record:
//! - Registration after the handshake, with duplicate-identity takeover
//! - Position updates and liveness refresh on every valid move
//! - Removal on disconnect, which is idempotent
//! - Point-in-time snapshots and locked iteration for fan-out and status
//! - Eviction of connections that have gone quiet
//!
//! Both indexes (connection to record, player ID to connection) live behind
//! one mutex so they can never disagree. Critical sections are short and
//! never perform I/O; closing a connection only raises its close signal.

use crate::connection::{ConnectionHandle, ConnectionToken};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Authoritative server-side state of one connected player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Last time a valid message arrived on this player's connection
    pub last_seen: Instant,
}

impl PlayerRecord {
    /// Creates a record at the origin, seen just now
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x: 0.0,
            y: 0.0,
            last_seen: Instant::now(),
        }
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

#[derive(Debug)]
struct Entry {
    handle: ConnectionHandle,
    record: PlayerRecord,
}

/// The two indexes guarded by the registry lock
#[derive(Debug, Default)]
struct PlayerTable {
    players: HashMap<ConnectionToken, Entry>,
    conns: HashMap<String, ConnectionToken>,
}

impl PlayerTable {
    fn remove(&mut self, token: ConnectionToken) -> Option<Entry> {
        let entry = self.players.remove(&token)?;
        if self.conns.get(&entry.record.id) == Some(&token) {
            self.conns.remove(&entry.record.id);
        }
        Some(entry)
    }

    fn is_consistent(&self) -> bool {
        self.players.len() == self.conns.len()
            && self.conns.iter().all(|(id, token)| {
                self.players
                    .get(token)
                    .map(|entry| &entry.record.id == id)
                    .unwrap_or(false)
            })
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    table: Mutex<PlayerTable>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlayerTable> {
        // Every operation leaves the table consistent before it can panic
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a connection under `record.id`
    ///
    /// If another connection already holds that player ID it is closed and
    /// removed first, so the newest connection always wins.
    pub fn add(&self, handle: ConnectionHandle, record: PlayerRecord) {
        let mut table = self.lock();
        let token = handle.token();

        if let Some(existing) = table.conns.get(&record.id).copied() {
            if existing != token {
                if let Some(old) = table.remove(existing) {
                    info!(
                        "Player {} already exists, removing old connection {} from {}",
                        record.id,
                        existing,
                        old.handle.peer_label()
                    );
                    old.handle.close();
                }
            }
        }

        // Re-registering the same connection under a new ID releases the old one
        if let Some(previous) = table.remove(token) {
            debug!(
                "Connection {} re-registered, releasing player {}",
                token, previous.record.id
            );
        }

        table.conns.insert(record.id.clone(), token);
        let id = record.id.clone();
        table.players.insert(token, Entry { handle, record });

        info!("Added player {}. Total players: {}", id, table.players.len());
    }

    /// Moves the player owning `token` and refreshes its liveness
    ///
    /// Returns false if the connection is no longer registered, which happens
    /// when a move races with eviction or teardown.
    pub fn update(&self, token: ConnectionToken, x: f64, y: f64) -> bool {
        let mut table = self.lock();

        match table.players.get_mut(&token) {
            Some(entry) => {
                entry.record.x = x;
                entry.record.y = y;
                entry.record.last_seen = entry.record.last_seen.max(Instant::now());
                debug!(
                    "Updated player {} position to ({:.2}, {:.2})",
                    entry.record.id, x, y
                );
                true
            }
            None => {
                warn!("Tried to update unknown connection {}", token);
                false
            }
        }
    }

    /// Removes a connection and returns its final record, if it was present
    pub fn delete(&self, token: ConnectionToken) -> Option<PlayerRecord> {
        let mut table = self.lock();

        match table.remove(token) {
            Some(entry) => {
                info!(
                    "Player {} disconnected, total players: {}",
                    entry.record.id,
                    table.players.len()
                );
                Some(entry.record)
            }
            None => {
                debug!("Connection {} already removed", token);
                None
            }
        }
    }

    /// Copies every record as of now
    pub fn snapshot(&self) -> Vec<PlayerRecord> {
        self.lock()
            .players
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Visits every entry while holding the lock
    ///
    /// The visitor must not call back into the registry and must not block.
    /// Return `ControlFlow::Break(())` to stop early.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&ConnectionHandle, &PlayerRecord) -> ControlFlow<()>,
    {
        let table = self.lock();
        for entry in table.players.values() {
            if visitor(&entry.handle, &entry.record).is_break() {
                break;
            }
        }
    }

    /// Evicts every connection silent for longer than `timeout`
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<String> {
        self.sweep_stale_at(Instant::now(), timeout)
    }

    /// Like [`sweep_stale`](Self::sweep_stale), measured against `now`
    pub fn sweep_stale_at(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut table = self.lock();

        let stale: Vec<ConnectionToken> = table
            .players
            .iter()
            .filter(|(_, entry)| entry.record.is_stale(now, timeout))
            .map(|(token, _)| *token)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for token in stale {
            if let Some(entry) = table.remove(token) {
                info!(
                    "Removing inactive player {} from {}",
                    entry.record.id,
                    entry.handle.peer_label()
                );
                entry.handle.close();
                evicted.push(entry.record.id);
            }
        }

        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().players.is_empty()
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.lock().conns.contains_key(player_id)
    }

    /// Returns the connection currently registered under `player_id`
    pub fn handle_for(&self, player_id: &str) -> Option<ConnectionHandle> {
        let table = self.lock();
        let token = table.conns.get(player_id)?;
        table.players.get(token).map(|entry| entry.handle.clone())
    }

    /// True when both indexes describe the same set of connections
    pub fn is_consistent(&self) -> bool {
        self.lock().is_consistent()
    }
}
