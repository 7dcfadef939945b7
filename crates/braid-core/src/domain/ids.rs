//! Task identifiers.
//!
//! A `TaskId` is an opaque string on the wire. How it is produced depends on the
//! queue's `IdStrategy`:
//! - **ContentHash**: SHA-256 of the payload's canonical JSON. Identical payloads
//!   collide to the same id, so consumers can dedup by id.
//! - **Random**: a ULID, unique per push even for identical payloads.
//!
//! A queue picks one strategy at construction time and never mixes them.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a Task (stable across retries).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a queue derives task ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Content-addressed: hash of the canonical payload.
    #[default]
    ContentHash,

    /// Random ULID per task.
    Random,
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdStrategy::ContentHash => f.write_str("content_hash"),
            IdStrategy::Random => f.write_str("random"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_serializes_as_plain_string() {
        let id = TaskId::new("abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn from_ulid_uses_canonical_text() {
        let ulid = Ulid::new();
        let id: TaskId = ulid.into();
        assert_eq!(id.as_str(), ulid.to_string());
    }

    #[test]
    fn id_strategy_reads_snake_case() {
        let strategy: IdStrategy = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(strategy, IdStrategy::Random);
        assert_eq!(IdStrategy::default(), IdStrategy::ContentHash);
        assert_eq!(IdStrategy::ContentHash.to_string(), "content_hash");
    }
}
