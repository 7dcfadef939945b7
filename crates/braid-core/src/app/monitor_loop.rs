//! TimeoutMonitor - stale claim detection.
//!
//! # Design
//! Probes the oldest entry of the active list and reports it once its age
//! reaches the SLA. The monitor never removes or rewrites the entry; recovery
//! (`Consumer::requeue`) is the caller's decision.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{EventBus, QueueError, QueueEvent, QueueStatus, Task};
use crate::queue::Queue;

#[derive(Debug)]
pub struct TimeoutMonitor {
    queue: Queue,
    sla: Duration,
    interval: Duration,
    events: EventBus,
}

impl TimeoutMonitor {
    /// Monitor using the queue's configured SLA and probe interval.
    pub fn new(queue: Queue) -> Self {
        let sla = queue.config().sla_timeout();
        let interval = queue.config().monitor_interval();
        Self {
            queue,
            sla,
            interval,
            events: EventBus::default(),
        }
    }

    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = sla;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// One probe. Returns the stale task, if the oldest claim is one.
    pub async fn check(&self) -> Result<Option<Task>, QueueError> {
        // claims land on the head, so the tail holds the oldest one
        let oldest = self
            .queue
            .store()
            .lindex(self.queue.work_key(), -1)
            .await
            .map_err(|err| {
                self.events.emit(QueueEvent::StoreError {
                    message: err.to_string(),
                });
                QueueError::from(err)
            })?;

        let Some(wire) = oldest else {
            return Ok(None);
        };

        let now = self.queue.clock().now();
        let task = match Task::rehydrate(&wire, false, now) {
            Ok(task) => task.with_claim(wire),
            Err(err) => {
                self.events.emit(QueueEvent::PayloadError {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        // clock skew can make the age negative
        let age = task.age(now).to_std().unwrap_or_default();
        if age < self.sla {
            return Ok(None);
        }

        warn!(
            queue = %self.queue.name(),
            task_id = %task.task_id(),
            age_ms = age.as_millis() as u64,
            sla_ms = self.sla.as_millis() as u64,
            "task exceeded its processing deadline"
        );
        self.events.emit(QueueEvent::TaskTimeout {
            task: task.clone(),
            age,
        });
        Ok(Some(task))
    }

    /// Probe every interval until shutdown or until the queue stops.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = self.events.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        MonitorHandle {
            shutdown_tx,
            join,
            events,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            queue = %self.queue.name(),
            interval_ms = self.interval.as_millis() as u64,
            "timeout monitor started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if self.queue.status() == QueueStatus::Stopped {
                break;
            }
            if !self.queue.store().is_connected() {
                debug!(queue = %self.queue.name(), "store unavailable, skipping probe");
                continue;
            }
            if let Err(err) = self.check().await {
                warn!(queue = %self.queue.name(), error = %err, "timeout probe failed");
            }
        }

        info!(queue = %self.queue.name(), "timeout monitor stopped");
    }
}

/// Handle to a spawned monitor loop.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    events: EventBus,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop probing and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
