//! Task envelope: identity, lifecycle and audit trail around a caller payload.
//!
//! The envelope is what travels through the store. Its JSON form doubles as the
//! exact-match key used to remove a claimed task from the active list, so a
//! claimed task keeps the wire string it was claimed with.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::QueueError;
use super::ids::TaskId;
use super::task_status::{NO_STATUS, TaskStatus};
use crate::ports::IdGenerator;

const STATUS_CHANGE: &str = "status change";

/// One status transition in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub from: String,
    pub to: String,
}

/// Milliseconds spent: since the last dispatch, and since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingDuration {
    pub current: i64,
    pub cumulative: i64,
}

/// Appended by `end_processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_processing: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_processing: DateTime<Utc>,
    pub duration: ProcessingDuration,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogEntry {
    StatusChange(StatusChange),
    Completion(Completion),
}

/// Wire record of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_at: DateTime<Utc>,
    /// Canonical JSON of the caller data.
    pub payload: String,
    #[serde(default)]
    pub retries: u32,
    pub status: TaskStatus,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

/// Serialize `payload` to JSON with object keys sorted at every level.
///
/// Equal data always yields the same string regardless of field order, which
/// is what content-addressed ids hash.
pub fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string(&canonicalize(value))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// A unit of work.
///
/// `task_id` and `created_at` never change. `retries`, `start_at`, `status` and
/// the log are the only mutable parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    record: TaskRecord,
    /// Exact string this task was claimed (or inspected) as.
    claim: Option<String>,
}

impl Task {
    /// Wrap new caller data.
    pub fn create<T: Serialize + ?Sized>(
        payload: &T,
        ids: &dyn IdGenerator,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let payload = canonical_json(payload)?;
        let record = TaskRecord {
            task_id: ids.generate(&payload),
            created_at: now,
            start_at: now,
            payload,
            retries: 0,
            status: TaskStatus::Custom(NO_STATUS.to_string()),
            log: Vec::new(),
        };
        let mut task = Self::from_record(record);
        task.update_status(TaskStatus::Created, now);
        Ok(task)
    }

    /// Rebuild a task from its wire form, optionally as a redelivery.
    pub fn rehydrate(wire: &str, is_retry: bool, now: DateTime<Utc>) -> Result<Self, QueueError> {
        let mut record: TaskRecord = serde_json::from_str(wire)?;

        // the label cannot carry the completion flag; the last completion record does
        if let TaskStatus::Completed(_) = record.status {
            let completed = record
                .log
                .iter()
                .rev()
                .find_map(|entry| match entry {
                    LogEntry::Completion(c) => Some(c.completed),
                    LogEntry::StatusChange(_) => None,
                })
                .unwrap_or(true);
            record.status = TaskStatus::Completed(completed);
        }

        let mut task = Self::from_record(record);
        if is_retry {
            task.retry(now);
        }
        Ok(task)
    }

    pub fn from_record(record: TaskRecord) -> Self {
        Self {
            record,
            claim: None,
        }
    }

    /// Wire form of the full envelope.
    pub fn serialize(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(&self.record)?)
    }

    /// Prepare for redelivery: new dispatch time, one more retry.
    pub fn retry(&mut self, now: DateTime<Utc>) {
        self.record.start_at = now;
        self.record.retries += 1;
        let retries = self.record.retries;
        self.update_status(TaskStatus::Retrying(retries), now);
    }

    /// Assign a status. Returns `false` (and logs nothing) when the label is unchanged.
    pub fn update_status(&mut self, status: TaskStatus, now: DateTime<Utc>) -> bool {
        if self.record.status.same_label(&status) {
            return false;
        }
        let from = self.record.status.label();
        let to = status.label();
        self.record.status = status;
        self.record.log.push(LogEntry::StatusChange(StatusChange {
            timestamp: now,
            action: STATUS_CHANGE.to_string(),
            from,
            to,
        }));
        true
    }

    /// Decode the payload for the handler and mark the task as in progress.
    pub fn start_processing<T: DeserializeOwned>(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<T, QueueError> {
        let data = serde_json::from_str(&self.record.payload)?;
        self.update_status(TaskStatus::Processing, now);
        Ok(data)
    }

    /// Mark processing as finished and record how long it took.
    pub fn end_processing(&mut self, completed: bool, now: DateTime<Utc>) {
        if !self.update_status(TaskStatus::Completed(completed), now) {
            // same label, but the flag must follow the latest completion record
            self.record.status = TaskStatus::Completed(completed);
        }
        let start_at = self.record.start_at;
        self.record.log.push(LogEntry::Completion(Completion {
            start_processing: start_at,
            end_processing: now,
            duration: ProcessingDuration {
                current: (now - start_at).num_milliseconds(),
                cumulative: (now - self.record.created_at).num_milliseconds(),
            },
            completed,
        }));
    }

    pub fn task_id(&self) -> &TaskId {
        &self.record.task_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.record.start_at
    }

    /// Canonical JSON of the caller data.
    pub fn payload(&self) -> &str {
        &self.record.payload
    }

    pub fn retries(&self) -> u32 {
        self.record.retries
    }

    pub fn status(&self) -> &TaskStatus {
        &self.record.status
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.record.log
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn into_record(self) -> TaskRecord {
        self.record
    }

    /// Time since creation.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.record.created_at
    }

    /// The exact store entry this task came from, if it was read from the active list.
    pub fn claim(&self) -> Option<&str> {
        self.claim.as_deref()
    }

    pub(crate) fn with_claim(mut self, wire: String) -> Self {
        self.claim = Some(wire);
        self
    }

    pub(crate) fn without_claim(mut self) -> Self {
        self.claim = None;
        self
    }
}
