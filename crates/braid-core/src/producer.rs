//! Producer: enqueue with backpressure.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{EventBus, QueueError, QueueEvent, Task};
use crate::queue::Queue;
use crate::telemetry::{self, ErrorKind};

/// Pushes tasks onto the head of the pending list.
///
/// Over capacity the push still lands, the queue is paused, and the caller
/// gets `QueueError::Overflow` as an advisory.
#[derive(Debug)]
pub struct Producer {
    queue: Queue,
    events: EventBus,
}

impl Producer {
    pub fn new(queue: Queue) -> Self {
        Self {
            queue,
            events: EventBus::default(),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Wrap `payload` in a task and enqueue it. Returns the new pending length.
    pub async fn push<T: Serialize + ?Sized>(&self, payload: &T) -> Result<u64, QueueError> {
        let started = Instant::now();
        let task = Task::create(payload, self.queue.ids(), self.queue.clock().now())?;

        if !self.queue.is_running() {
            return Err(self.queue.not_running());
        }

        let wire = task.serialize()?;
        let length = match self.queue.store().lpush(self.queue.key(), &wire).await {
            Ok(length) => length,
            Err(err) => {
                warn!(queue = %self.queue.name(), error = %err, "push failed");
                telemetry::record_error(self.queue.name(), ErrorKind::Store);
                self.events.emit(QueueEvent::StoreError {
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let duration = started.elapsed();
        telemetry::record_push(self.queue.name(), duration);
        debug!(
            queue = %self.queue.name(),
            task_id = %task.task_id(),
            length,
            elapsed_ms = duration.as_millis() as u64,
            "task pushed"
        );
        self.events.emit(QueueEvent::Pushed {
            task_id: task.task_id().clone(),
            length,
            duration,
        });

        let max_size = self.queue.max_size();
        if length < 0 || length as u64 >= max_size {
            warn!(queue = %self.queue.name(), length, max_size, "queue over capacity, pausing");
            telemetry::record_error(self.queue.name(), ErrorKind::Overflow);
            self.events.emit(QueueEvent::Overflow { length, max_size });
            self.queue.pause().await?;
            return Err(QueueError::Overflow {
                queue: self.queue.name().to_string(),
                max_size,
                length,
            });
        }

        Ok(length as u64)
    }
}
