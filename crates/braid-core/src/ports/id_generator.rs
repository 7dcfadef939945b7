//! IdGenerator port - task id derivation.
//!
//! # Implementations
//! - **ContentHashGenerator**: SHA-256 over the canonical payload (dedup friendly)
//! - **UlidGenerator**: time-sortable random ids

use std::sync::Arc;

use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::domain::{IdStrategy, TaskId};
use crate::ports::Clock;

/// IdGenerator derives a `TaskId` for a new task.
///
/// `canonical_payload` is the payload exactly as it will be stored on the wire.
pub trait IdGenerator: Send + Sync {
    fn generate(&self, canonical_payload: &str) -> TaskId;

    fn strategy(&self) -> IdStrategy;
}

/// Content-addressed ids: identical payloads produce identical ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashGenerator;

impl IdGenerator for ContentHashGenerator {
    fn generate(&self, canonical_payload: &str) -> TaskId {
        let digest = Sha256::digest(canonical_payload.as_bytes());
        TaskId::new(hex::encode(digest))
    }

    fn strategy(&self) -> IdStrategy {
        IdStrategy::ContentHash
    }
}

/// ULID based ids.
///
/// The timestamp half comes from the clock, so a `FixedClock` pins it in tests.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate(&self, _canonical_payload: &str) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        TaskId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    fn strategy(&self) -> IdStrategy {
        IdStrategy::Random
    }
}

/// Build the generator for a strategy.
pub fn generator_for(strategy: IdStrategy, clock: Arc<dyn Clock>) -> Arc<dyn IdGenerator> {
    match strategy {
        IdStrategy::ContentHash => Arc::new(ContentHashGenerator),
        IdStrategy::Random => Arc::new(UlidGenerator::new(clock)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn content_hash_is_deterministic() {
        let id_gen = ContentHashGenerator;
        let a = id_gen.generate(r#"{"a":1}"#);
        let b = id_gen.generate(r#"{"a":1}"#);
        let c = id_gen.generate(r#"{"a":2}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate("same");
        let id2 = id_gen.generate("same");
        assert_ne!(id1, id2);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_pins_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id = id_gen.generate("x");
        let ulid = Ulid::from_string(id.as_str()).unwrap();
        assert_eq!(ulid.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn generator_for_matches_strategy() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        assert_eq!(
            generator_for(IdStrategy::ContentHash, clock.clone()).strategy(),
            IdStrategy::ContentHash
        );
        assert_eq!(
            generator_for(IdStrategy::Random, clock).strategy(),
            IdStrategy::Random
        );
    }
}
