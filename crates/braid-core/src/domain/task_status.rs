//! Task lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle label of a task.
///
/// On the wire the status is the rendered label (`created`, `start processing`,
/// `end processing`, `retry: 3`, or any free text). Two statuses are the same
/// transition when their labels are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TaskStatus {
    Created,
    Processing,
    /// Redelivered; carries the retry count.
    Retrying(u32),
    /// Processing finished; `false` when the handler reported failure.
    ///
    /// Both outcomes render as `end processing`; the flag itself is kept in the
    /// completion record of the audit log.
    Completed(bool),
    Custom(String),
}

/// Label used as `from` on the very first log entry.
pub const NO_STATUS: &str = "n/a";

const CREATED: &str = "created";
const PROCESSING: &str = "start processing";
const COMPLETED: &str = "end processing";
const RETRY_PREFIX: &str = "retry: ";

impl TaskStatus {
    /// Audit-log rendering.
    pub fn label(&self) -> String {
        match self {
            TaskStatus::Created => CREATED.to_string(),
            TaskStatus::Processing => PROCESSING.to_string(),
            TaskStatus::Retrying(n) => format!("{RETRY_PREFIX}{n}"),
            TaskStatus::Completed(_) => COMPLETED.to_string(),
            TaskStatus::Custom(s) => s.clone(),
        }
    }

    /// Same label, i.e. assigning `other` would be a no-op.
    pub fn same_label(&self, other: &TaskStatus) -> bool {
        self.label() == other.label()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.label()
    }
}

impl From<String> for TaskStatus {
    fn from(label: String) -> Self {
        match label.as_str() {
            CREATED => TaskStatus::Created,
            PROCESSING => TaskStatus::Processing,
            COMPLETED => TaskStatus::Completed(true),
            other => match other
                .strip_prefix(RETRY_PREFIX)
                .and_then(|n| n.parse::<u32>().ok())
            {
                Some(n) => TaskStatus::Retrying(n),
                None => TaskStatus::Custom(label),
            },
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(label: &str) -> Self {
        TaskStatus::from(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::created(TaskStatus::Created, "created")]
    #[case::processing(TaskStatus::Processing, "start processing")]
    #[case::retrying(TaskStatus::Retrying(3), "retry: 3")]
    #[case::completed(TaskStatus::Completed(false), "end processing")]
    #[case::custom(TaskStatus::Custom("parked".into()), "parked")]
    fn renders_audit_label(#[case] status: TaskStatus, #[case] label: &str) {
        assert_eq!(status.label(), label);
    }

    #[rstest]
    #[case::created("created", TaskStatus::Created)]
    #[case::retrying("retry: 12", TaskStatus::Retrying(12))]
    #[case::completed("end processing", TaskStatus::Completed(true))]
    #[case::bad_retry("retry: many", TaskStatus::Custom("retry: many".into()))]
    fn parses_wire_label(#[case] label: &str, #[case] expected: TaskStatus) {
        assert_eq!(TaskStatus::from(label), expected);
    }

    #[test]
    fn completion_flag_does_not_change_label() {
        assert!(TaskStatus::Completed(true).same_label(&TaskStatus::Completed(false)));
        assert!(!TaskStatus::Retrying(1).same_label(&TaskStatus::Retrying(2)));
    }

    #[test]
    fn serializes_as_label_string() {
        let json = serde_json::to_string(&TaskStatus::Retrying(2)).unwrap();
        assert_eq!(json, "\"retry: 2\"");
    }
}
