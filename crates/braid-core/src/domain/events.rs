//! Events - observability notifications.
//!
//! Every Queue, Producer, Consumer and TimeoutMonitor owns an `EventBus`.
//! Callers `subscribe()` to receive each event once; emitting with no
//! subscribers is not an error.

use std::time::Duration;

use tokio::sync::broadcast;

use super::ids::TaskId;
use super::state::QueueStatus;
use super::task::Task;

/// Default buffered events per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum QueueEvent {
    // ---- Queue ----
    StatusChanged {
        from: QueueStatus,
        to: QueueStatus,
    },
    /// Entered a pause cycle; an automatic resume is scheduled.
    Paused {
        backoff_index: usize,
        resume_in: Duration,
    },
    /// Backoff schedule exhausted; the queue is shutting down.
    CircuitExhausted {
        attempts: usize,
    },
    /// The store reported (or a command hit) an error.
    StoreError {
        message: String,
    },
    /// The store connection closed.
    StoreEnded,

    // ---- Producer ----
    Pushed {
        task_id: TaskId,
        length: i64,
        duration: Duration,
    },
    Overflow {
        length: i64,
        max_size: u64,
    },

    // ---- Consumer ----
    Claimed {
        task: Task,
    },
    IdleTimeout {
        timeout: Duration,
    },
    Acked {
        task_id: TaskId,
        removed: u64,
    },
    Requeued {
        task_id: TaskId,
        retries: u32,
    },
    PayloadError {
        message: String,
    },

    // ---- TimeoutMonitor ----
    TaskTimeout {
        task: Task,
        age: Duration,
    },
}

/// Broadcast fan-out of `QueueEvent`s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: QueueEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_each_event_once() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(QueueEvent::StoreEnded);
        bus.emit(QueueEvent::IdleTimeout {
            timeout: Duration::from_secs(1),
        });

        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::StoreEnded));
        assert!(matches!(
            rx.recv().await.unwrap(),
            QueueEvent::IdleTimeout { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(0);
        bus.emit(QueueEvent::StoreEnded);
    }
}
