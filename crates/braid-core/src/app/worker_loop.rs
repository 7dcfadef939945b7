//! WorkerLoop - claim, handle, settle.
//!
//! # Design
//! Each worker pops a task, runs the handler on its payload, then settles the
//! claim: ack on success, requeue on failure while retries remain, otherwise
//! ack and log the task as discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::consumer::Consumer;
use crate::domain::{QueueError, Task};

/// Pause between pops while the queue is paused or the store is failing.
const UNAVAILABLE_BACKOFF: Duration = Duration::from_millis(500);

/// Handler failure; the task is retried or discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Processes one task.
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl TaskHandler for Echo {
///     async fn handle(&self, task: &Task, data: Value) -> Result<(), HandlerError> {
///         println!("{}: {data}", task.task_id());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, data: Value) -> Result<(), HandlerError>;
}

/// Worker group handle.
/// - dropping the handle without shutdown also stops the workers
/// - in-flight handlers are never cancelled
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing `consumer`.
    pub fn spawn(
        n: usize,
        consumer: Arc<Consumer>,
        handler: Arc<dyn TaskHandler>,
        max_retries: u32,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let consumer = Arc::clone(&consumer);
            let handler = Arc::clone(&handler);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, consumer, handler, max_retries, &mut rx).await;
            });
            joins.push(join);
        }

        info!(workers = n, max_retries, "worker group started");
        Self { shutdown_tx, joins }
    }

    /// Stop taking new tasks. Handlers already running finish normally.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for the workers to exit on their own (the queue stopped).
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    consumer: Arc<Consumer>,
    handler: Arc<dyn TaskHandler>,
    max_retries: u32,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // pop may block for the whole idle timeout
        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            popped = consumer.pop() => popped,
        };

        let task = match popped {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(QueueError::NotRunning { status, .. }) if status.is_closing() => {
                info!(worker_id, %status, "queue closing, worker exiting");
                break;
            }
            Err(err) if err.is_fatal() => {
                error!(worker_id, error = %err, "worker exiting");
                break;
            }
            Err(err) => {
                debug!(worker_id, error = %err, "no task available");
                if !wait_or_shutdown(shutdown_rx, UNAVAILABLE_BACKOFF).await {
                    break;
                }
                continue;
            }
        };

        process(worker_id, &consumer, handler.as_ref(), max_retries, task).await;
    }

    debug!(worker_id, "worker stopped");
}

async fn process(
    worker_id: usize,
    consumer: &Consumer,
    handler: &dyn TaskHandler,
    max_retries: u32,
    mut task: Task,
) {
    let clock = consumer.queue().clock();

    let data: Value = match task.start_processing(clock.now()) {
        Ok(data) => data,
        Err(err) => {
            error!(worker_id, task_id = %task.task_id(), error = %err, "undecodable payload, discarding task");
            if let Err(err) = consumer.ack(&task).await {
                warn!(worker_id, task_id = %task.task_id(), error = %err, "ack failed");
            }
            return;
        }
    };

    let outcome = handler.handle(&task, data).await;
    task.end_processing(outcome.is_ok(), clock.now());

    match outcome {
        Ok(()) => {
            if let Err(err) = consumer.ack(&task).await {
                warn!(worker_id, task_id = %task.task_id(), error = %err, "ack failed");
            }
        }
        Err(failure) if task.retries() < max_retries => {
            warn!(
                worker_id,
                task_id = %task.task_id(),
                retries = task.retries(),
                error = %failure,
                "handler failed, requeueing"
            );
            if let Err(err) = consumer.requeue(&task).await {
                warn!(worker_id, task_id = %task.task_id(), error = %err, "requeue failed");
            }
        }
        Err(failure) => {
            error!(
                worker_id,
                task_id = %task.task_id(),
                retries = task.retries(),
                error = %failure,
                payload = %task.payload(),
                "handler failed, retries exhausted; discarding task"
            );
            if let Err(err) = consumer.ack(&task).await {
                warn!(worker_id, task_id = %task.task_id(), error = %err, "ack failed");
            }
        }
    }
}

/// Sleep for `delay`. Returns `false` when shutdown arrives first.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::producer::Producer;
    use crate::queue::tests::{eventually, queue_with};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct Recorder {
        failures: AtomicU32,
        seen: Mutex<Vec<(Value, u32)>>,
    }

    impl Recorder {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &Task, data: Value) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push((data, task.retries()));
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(HandlerError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn setup() -> (Producer, Arc<Consumer>) {
        let (_store, queue) = queue_with(QueueConfig::new("jobs").with_idle_timeout_secs(1));
        (
            Producer::new(queue.clone()),
            Arc::new(Consumer::new(queue)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn workers_drain_the_queue() {
        let (producer, consumer) = setup();
        let handler = Recorder::failing(0);
        for n in 0..5 {
            producer.push(&json!({ "n": n })).await.unwrap();
        }

        let group = WorkerGroup::spawn(2, consumer.clone(), handler.clone(), 3);
        eventually("all handled", || handler.calls() == 5).await;
        group.shutdown_and_join().await;

        assert_eq!(consumer.queue().pending().await.unwrap(), 0);
        assert_eq!(consumer.queue().processing().await.unwrap(), 0);

        let mut seen: Vec<i64> = handler
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(data, _)| data["n"].as_i64().unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_retried_then_succeeds() {
        let (producer, consumer) = setup();
        let handler = Recorder::failing(1);
        producer.push(&json!("flaky")).await.unwrap();

        let group = WorkerGroup::spawn(1, consumer.clone(), handler.clone(), 3);
        eventually("retry handled", || handler.calls() == 2).await;
        group.shutdown_and_join().await;

        let retries: Vec<u32> = handler.seen.lock().unwrap().iter().map(|(_, r)| *r).collect();
        assert_eq!(retries, [0, 1]);
        assert_eq!(consumer.queue().pending().await.unwrap(), 0);
        assert_eq!(consumer.queue().processing().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_discard_the_task() {
        let (producer, consumer) = setup();
        let handler = Recorder::failing(u32::MAX);
        producer.push(&json!("poison")).await.unwrap();

        let group = WorkerGroup::spawn(1, consumer.clone(), handler.clone(), 2);
        eventually("all attempts", || handler.calls() == 3).await;
        group.shutdown_and_join().await;

        assert_eq!(handler.calls(), 3);
        assert_eq!(consumer.queue().pending().await.unwrap(), 0);
        assert_eq!(consumer.queue().processing().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_exit_when_the_queue_stops() {
        let (_producer, consumer) = setup();
        let group = WorkerGroup::spawn(2, consumer.clone(), Recorder::failing(0), 3);

        consumer.queue().stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), group.join())
            .await
            .unwrap();
    }
}
