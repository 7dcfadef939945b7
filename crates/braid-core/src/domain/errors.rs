//! Queue error taxonomy.

use thiserror::Error;

use super::state::QueueStatus;
use crate::ports::StoreError;

/// Errors surfaced by Queue, Producer, Consumer and the monitor.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Fatal, construction time.
    #[error("invalid queue configuration: {0}")]
    Configuration(String),

    /// Push or pop while paused/stopped. The caller decides whether to retry.
    #[error("queue `{queue}` is not running (status: {status})")]
    NotRunning { queue: String, status: QueueStatus },

    /// A store command failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Advisory: the push went through but the pending list is over capacity
    /// and the queue has been paused.
    #[error("number of items in queue `{queue}` has exceeded {max_size}: {length}")]
    Overflow {
        queue: String,
        max_size: u64,
        length: i64,
    },

    /// Malformed wire record or payload.
    #[error("corrupt task payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Pause backoff schedule exhausted; the queue is stopped for good.
    #[error("queue `{queue}` stopped after {attempts} consecutive pauses")]
    CircuitExhausted { queue: String, attempts: usize },

    #[error("connection is already closing")]
    AlreadyClosing,

    #[error("attempt to set unknown queue status `{0}`")]
    InvalidStatus(String),

    /// The requested status is not reachable from the current one.
    #[error("queue cannot move from {from} to {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },
}

impl QueueError {
    /// Errors after which the queue will never accept work again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QueueError::Configuration(_) | QueueError::CircuitExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_names_the_limit() {
        let err = QueueError::Overflow {
            queue: "jobs".into(),
            max_size: 5,
            length: 6,
        };
        assert_eq!(
            err.to_string(),
            "number of items in queue `jobs` has exceeded 5: 6"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn store_errors_convert() {
        let err: QueueError = StoreError::Disconnected.into();
        assert!(matches!(err, QueueError::Store(StoreError::Disconnected)));
    }

    #[test]
    fn circuit_exhaustion_is_fatal() {
        let err = QueueError::CircuitExhausted {
            queue: "jobs".into(),
            attempts: 6,
        };
        assert!(err.is_fatal());
    }
}
