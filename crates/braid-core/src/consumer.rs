//! Consumer: claim, acknowledge and requeue.
//!
//! A claim atomically moves the oldest pending entry onto the head of the
//! active list. The entry stays there until it is acknowledged, so a consumer
//! that dies mid-task leaves its claim behind for the timeout monitor.

use std::borrow::Cow;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{EventBus, QueueError, QueueEvent, Task};
use crate::ports::StoreError;
use crate::queue::Queue;
use crate::telemetry::{self, ErrorKind};

#[derive(Debug)]
pub struct Consumer {
    queue: Queue,
    idle_timeout: Duration,
    events: EventBus,
}

impl Consumer {
    /// Consumer with the queue's configured idle timeout.
    pub fn new(queue: Queue) -> Self {
        let idle_timeout = queue.config().idle_timeout();
        Self {
            queue,
            idle_timeout,
            events: EventBus::default(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Claim the oldest pending task, waiting up to the idle timeout.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub async fn pop(&self) -> Result<Option<Task>, QueueError> {
        self.pop_with_timeout(self.idle_timeout).await
    }

    pub async fn pop_with_timeout(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        if !self.queue.is_running() {
            return Err(self.queue.not_running());
        }

        let started = Instant::now();
        let store = self.queue.store();
        let claimed = store
            .brpoplpush(self.queue.key(), self.queue.work_key(), timeout)
            .await
            .map_err(|err| self.store_failure("pop", err))?;

        let Some(wire) = claimed else {
            debug!(queue = %self.queue.name(), timeout_ms = timeout.as_millis() as u64, "idle timeout");
            self.events.emit(QueueEvent::IdleTimeout { timeout });
            return Ok(None);
        };

        match Task::rehydrate(&wire, false, self.queue.clock().now()) {
            Ok(task) => {
                let task = task.with_claim(wire);
                telemetry::record_claim(self.queue.name(), started.elapsed());
                debug!(queue = %self.queue.name(), task_id = %task.task_id(), "task claimed");
                self.events.emit(QueueEvent::Claimed { task: task.clone() });
                Ok(Some(task))
            }
            Err(err) => {
                // an unreadable entry can never be acked; drop it from active
                error!(queue = %self.queue.name(), error = %err, record = %wire, "discarding corrupt task");
                telemetry::record_error(self.queue.name(), ErrorKind::Payload);
                self.events.emit(QueueEvent::PayloadError {
                    message: err.to_string(),
                });
                store
                    .lrem(self.queue.work_key(), 1, &wire)
                    .await
                    .map_err(|err| self.store_failure("discard", err))?;
                Err(err)
            }
        }
    }

    /// Remove the task's claim from the active list.
    ///
    /// Returns the number of entries removed. 0 means the claim was already
    /// gone (acked twice, or removed by someone else) and is only a warning.
    pub async fn ack(&self, task: &Task) -> Result<u64, QueueError> {
        let claim = claim_of(task)?;
        let removed = self
            .queue
            .store()
            .lrem(self.queue.work_key(), 1, &claim)
            .await
            .map_err(|err| self.store_failure("ack", err))?;

        if removed == 0 {
            warn!(queue = %self.queue.name(), task_id = %task.task_id(), "ack matched no active entry");
        } else {
            debug!(queue = %self.queue.name(), task_id = %task.task_id(), "task acked");
        }
        self.events.emit(QueueEvent::Acked {
            task_id: task.task_id().clone(),
            removed,
        });
        Ok(removed)
    }

    /// Put a claimed task back on the pending list as a retry.
    ///
    /// The retried envelope is pushed before the old claim is removed, so a
    /// crash in between duplicates the task instead of losing it.
    pub async fn requeue(&self, task: &Task) -> Result<Task, QueueError> {
        let claim = claim_of(task)?;
        let mut retried = task.clone().without_claim();
        retried.retry(self.queue.clock().now());
        let wire = retried.serialize()?;

        let store = self.queue.store();
        store
            .lpush(self.queue.key(), &wire)
            .await
            .map_err(|err| self.store_failure("requeue", err))?;
        store
            .lrem(self.queue.work_key(), 1, &claim)
            .await
            .map_err(|err| self.store_failure("requeue", err))?;

        info!(
            queue = %self.queue.name(),
            task_id = %retried.task_id(),
            retries = retried.retries(),
            "task requeued"
        );
        self.events.emit(QueueEvent::Requeued {
            task_id: retried.task_id().clone(),
            retries: retried.retries(),
        });
        Ok(retried)
    }

    fn store_failure(&self, op: &str, err: StoreError) -> QueueError {
        warn!(queue = %self.queue.name(), op, error = %err, "store command failed");
        telemetry::record_error(self.queue.name(), ErrorKind::Store);
        self.events.emit(QueueEvent::StoreError {
            message: err.to_string(),
        });
        err.into()
    }
}

/// The active-list entry for `task`: its claim string, or its current wire form.
fn claim_of(task: &Task) -> Result<Cow<'_, str>, QueueError> {
    match task.claim() {
        Some(claim) => Ok(Cow::Borrowed(claim)),
        None => Ok(Cow::Owned(task.serialize()?)),
    }
}
