use crate::registry::ConnectionRegistry;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Periodically evicts connections that stopped sending valid messages.
///
/// This catches half-open clients whose reads never error. The stale
/// timeout should comfortably exceed the interval so players who are
/// merely standing still between updates survive a tick.
pub struct IdleSweeper {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl IdleSweeper {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
        }
    }

    /// Runs one sweep and returns the evicted player IDs
    pub fn sweep(&self) -> Vec<String> {
        let evicted = self.registry.sweep_stale(self.timeout);
        if evicted.is_empty() {
            debug!("Sweep found no inactive players");
        } else {
            info!(
                "Swept {} inactive players, {} remaining",
                evicted.len(),
                self.registry.len()
            );
        }
        evicted
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep();
        }
    }
}
