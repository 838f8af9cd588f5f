//! Player identity assignment
//!
//! Identities are random bytes from the operating system's entropy source,
//! hex-encoded. Uniqueness is best effort: if the entropy source fails the
//! generator falls back to a clock-derived identifier instead of refusing the
//! connection, and the registry's duplicate-takeover rule covers any collision.

use log::error;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of random bytes in an identity when not configured otherwise
pub const DEFAULT_ID_BYTES: usize = 8;

#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    id_bytes: usize,
}

impl IdentityGenerator {
    pub fn new(id_bytes: usize) -> Self {
        Self {
            id_bytes: id_bytes.max(1),
        }
    }

    /// Produces a fresh player identity, never failing
    pub fn generate(&self) -> String {
        self.generate_with(&mut OsRng)
    }

    fn generate_with<R: RngCore>(&self, rng: &mut R) -> String {
        let mut bytes = vec![0u8; self.id_bytes];
        match rng.try_fill_bytes(&mut bytes) {
            Ok(()) => hex::encode(bytes),
            Err(e) => {
                error!("Error generating secure ID: {}", e);
                timestamp_id()
            }
        }
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_BYTES)
    }
}

fn timestamp_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    hex::encode(nanos.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source unavailable",
            )))
        }
    }

    #[test]
    fn test_generated_id_is_hex_of_configured_length() {
        let generator = IdentityGenerator::new(4);
        let id = generator.generate();

        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_default_length() {
        let id = IdentityGenerator::default().generate();
        assert_eq!(id.len(), DEFAULT_ID_BYTES * 2);
    }

    #[test]
    fn test_zero_length_is_clamped() {
        let id = IdentityGenerator::new(0).generate();
        assert_eq!(id.len(), 2);
    }

    #[test]
    fn test_ids_do_not_collide() {
        let generator = IdentityGenerator::default();
        let ids: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_entropy_failure_falls_back_to_timestamp() {
        let generator = IdentityGenerator::default();
        let id = generator.generate_with(&mut BrokenRng);

        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        // u128 nanoseconds, big-endian
        assert_eq!(id.len(), 32);
    }
}
