//! Broadcast fan-out of move events
//!
//! Sessions hand validated moves to a [`Publisher`]; a single
//! [`BroadcastDispatcher`] worker drains them in FIFO order and delivers each
//! one to every registered connection except the player who moved.

use crate::connection::ConnectionHandle;
use crate::registry::ConnectionRegistry;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use shared::{encode_message, MoveMessage};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("broadcast dispatcher has stopped")]
pub struct PublishError(pub MoveMessage);

/// Outcome of fanning out one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
}

/// Cloneable input side of the dispatcher queue
#[derive(Debug, Clone)]
pub struct Publisher {
    queue: mpsc::Sender<MoveMessage>,
}

impl Publisher {
    /// Enqueues an event, waiting while the dispatcher is behind
    pub async fn publish(&self, event: MoveMessage) -> Result<(), PublishError> {
        self.queue
            .send(event)
            .await
            .map_err(|mpsc::error::SendError(event)| PublishError(event))
    }
}

pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    queue: mpsc::Receiver<MoveMessage>,
    write_timeout: Duration,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue_capacity: usize,
        write_timeout: Duration,
    ) -> (Publisher, Self) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let dispatcher = BroadcastDispatcher {
            registry,
            queue: rx,
            write_timeout,
        };
        (Publisher { queue: tx }, dispatcher)
    }

    /// Runs until every publisher has been dropped
    pub async fn run(mut self) {
        while let Some(event) = self.queue.recv().await {
            let report = self.fan_out(&event).await;
            debug!(
                "Broadcast complete: sent to {} out of {} players",
                report.delivered, report.recipients
            );
        }
        info!("Broadcast dispatcher stopped: all publishers closed");
    }

    /// Delivers one event to every connection except the mover's own
    pub async fn fan_out(&self, event: &MoveMessage) -> BroadcastReport {
        let frame = match encode_message(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode move from {}: {}", event.player_id, e);
                return BroadcastReport::default();
            }
        };

        let mut targets: Vec<(ConnectionHandle, String)> = Vec::new();
        self.registry.for_each(|handle, record| {
            if record.id != event.player_id {
                targets.push((handle.clone(), record.id.clone()));
            }
            ControlFlow::Continue(())
        });

        let recipients = targets.len();
        let deliveries = targets.into_iter().map(|(handle, player_id)| {
            let frame = frame.clone();
            async move {
                debug!(
                    "Broadcasting movement of player {} to player {}: ({:.2}, {:.2})",
                    event.player_id, player_id, event.x, event.y
                );
                match handle.send(frame, self.write_timeout).await {
                    Ok(()) => true,
                    Err(e) => {
                        // Left in place; the peer's session or the sweeper removes it
                        warn!("Error broadcasting to {}: {}", player_id, e);
                        false
                    }
                }
            }
        });

        let delivered = join_all(deliveries)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        BroadcastReport {
            recipients,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionIo;
    use crate::registry::PlayerRecord;
    use shared::decode_message;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn register(
        registry: &ConnectionRegistry,
        id: &str,
        capacity: usize,
    ) -> (ConnectionHandle, ConnectionIo) {
        let (handle, io) = ConnectionHandle::new(None, capacity);
        registry.add(handle.clone(), PlayerRecord::new(id));
        (handle, io)
    }

    #[tokio::test]
    async fn test_fan_out_skips_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut a_io) = register(&registry, "a", 4);
        let (_b, mut b_io) = register(&registry, "b", 4);
        let (_c, mut c_io) = register(&registry, "c", 4);
        let (_publisher, dispatcher) =
            BroadcastDispatcher::new(registry.clone(), 1, Duration::from_millis(50));

        let report = dispatcher.fan_out(&MoveMessage::new("a", 1.0, 2.0)).await;

        assert_eq!(report, BroadcastReport { recipients: 2, delivered: 2 });
        assert!(a_io.outbound.try_recv().is_err());
        for io in [&mut b_io, &mut c_io] {
            let frame = io.outbound.try_recv().unwrap();
            let msg = decode_message(frame.as_bytes()).unwrap();
            assert_eq!(msg, MoveMessage::new("a", 1.0, 2.0));
        }
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_block_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (slow, _slow_io) = register(&registry, "slow", 1);
        let (_gone, gone_io) = register(&registry, "gone", 4);
        let (_ok, mut ok_io) = register(&registry, "ok", 4);
        drop(gone_io);
        slow.send("backlog".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        let (_publisher, dispatcher) =
            BroadcastDispatcher::new(registry.clone(), 1, Duration::from_millis(20));

        let report = dispatcher.fan_out(&MoveMessage::new("mover", 5.0, 6.0)).await;

        assert_eq!(report, BroadcastReport { recipients: 3, delivered: 1 });
        assert!(ok_io.outbound.try_recv().is_ok());
        // Failed peers stay registered until their own cleanup runs
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_run_delivers_in_publish_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_watcher, mut watcher_io) = register(&registry, "watcher", 16);
        let (publisher, dispatcher) =
            BroadcastDispatcher::new(registry.clone(), 4, Duration::from_millis(50));
        let worker = tokio::spawn(dispatcher.run());

        for i in 0..5 {
            publisher
                .publish(MoveMessage::new("mover", i as f64, 0.0))
                .await
                .unwrap();
        }
        drop(publisher);
        worker.await.unwrap();

        for i in 0..5 {
            let frame = watcher_io.outbound.recv().await.unwrap();
            let msg = decode_message(frame.as_bytes()).unwrap();
            assert_eq!(msg.x, i as f64);
        }
    }

    #[tokio::test]
    async fn test_publish_applies_backpressure() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (publisher, dispatcher) =
            BroadcastDispatcher::new(registry, 1, Duration::from_millis(50));

        publisher
            .publish(MoveMessage::new("a", 0.0, 0.0))
            .await
            .unwrap();

        let mut blocked = task::spawn(publisher.publish(MoveMessage::new("a", 1.0, 1.0)));
        assert_pending!(blocked.poll());

        let mut dispatcher = dispatcher;
        assert!(dispatcher.queue.recv().await.is_some());
        assert!(blocked.is_woken());
        assert_ready_ok!(blocked.poll());
    }

    #[tokio::test]
    async fn test_publish_fails_after_dispatcher_stops() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (publisher, dispatcher) =
            BroadcastDispatcher::new(registry, 1, Duration::from_millis(50));
        drop(dispatcher);

        let result = publisher.publish(MoveMessage::new("a", 3.0, 4.0)).await;
        let PublishError(event) = result.unwrap_err();
        assert_eq!(event.player_id, "a");
    }
}
