//! Queue flow-control state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::QueueError;

/// Queue status.
///
/// State transitions:
/// - any -> Stopping -> Stopped (explicit stop, store closed)
/// - Running -> Paused (store reconnecting, capacity exceeded)
/// - Paused -> Running (store ready, resume, backoff timer)
/// - Paused -> Stopping -> Stopped (backoff schedule exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// No store connection. Terminal.
    Stopped,

    /// Store teardown in progress.
    Stopping,

    /// Accepting enqueue and dequeue.
    Running,

    /// Enqueue and dequeue suspended, connection still held.
    Paused,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Stopped => "stopped",
            QueueStatus::Stopping => "stopping",
            QueueStatus::Running => "running",
            QueueStatus::Paused => "paused",
        }
    }

    /// Stopped or on the way there.
    pub fn is_closing(self) -> bool {
        matches!(self, QueueStatus::Stopped | QueueStatus::Stopping)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(QueueStatus::Stopped),
            "stopping" => Ok(QueueStatus::Stopping),
            "running" => Ok(QueueStatus::Running),
            "paused" => Ok(QueueStatus::Paused),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        for status in [
            QueueStatus::Stopped,
            QueueStatus::Stopping,
            QueueStatus::Running,
            QueueStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
    }

    #[test]
    fn rejects_unknown_label() {
        let err = "sleeping".parse::<QueueStatus>().unwrap_err();
        assert!(matches!(err, QueueError::InvalidStatus(ref s) if s == "sleeping"));
    }

    #[test]
    fn closing_states() {
        assert!(QueueStatus::Stopped.is_closing());
        assert!(QueueStatus::Stopping.is_closing());
        assert!(!QueueStatus::Paused.is_closing());
    }
}
