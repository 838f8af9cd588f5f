use crate::identity::DEFAULT_ID_BYTES;
use crate::session::SessionConfig;
use shared::DEFAULT_PORT;
use std::time::Duration;

/// Everything needed to start a relay server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a session waits for the next client message
    pub read_timeout: Duration,
    /// Deadline for each fan-out delivery and each socket write
    pub write_timeout: Duration,
    /// Deadline for each initial-sync write to a new client
    pub sync_timeout: Duration,
    pub sweep_interval: Duration,
    /// Age after which a silent connection is evicted
    pub stale_timeout: Duration,
    /// Capacity of the dispatcher queue; 1 is a near-synchronous hand-off
    pub dispatch_queue: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
    pub id_bytes: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            sync_timeout: self.sync_timeout,
            outbound_capacity: self.outbound_queue,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(30),
            dispatch_queue: 1,
            outbound_queue: 64,
            id_bytes: DEFAULT_ID_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        // Idle players must survive at least one sweep tick
        assert!(config.stale_timeout > config.sweep_interval);
        assert!(config.write_timeout < config.read_timeout);
    }

    #[test]
    fn test_session_config_mirrors_server_config() {
        let config = ServerConfig {
            read_timeout: Duration::from_secs(3),
            outbound_queue: 7,
            ..ServerConfig::default()
        };

        let session = config.session();
        assert_eq!(session.read_timeout, Duration::from_secs(3));
        assert_eq!(session.write_timeout, config.write_timeout);
        assert_eq!(session.sync_timeout, config.sync_timeout);
        assert_eq!(session.outbound_capacity, 7);
    }
}
