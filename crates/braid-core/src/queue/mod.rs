//! Queue: owner of the store connection and the flow-control state machine.
//!
//! Design:
//! - `status` changes go through one place (`update`) which emits
//!   `StatusChanged` under the state lock, only when the value changes.
//! - Callers move the status with `pause`, `resume` and `stop`; labels are
//!   routed through the same transitions, never assigned directly.
//! - The state lock is a plain mutex and is never held across `.await`.
//! - Backoff timers hold a `Weak` handle and re-check the pause cycle they were
//!   scheduled for, so a timer outliving its cycle does nothing.

mod backoff;

pub use backoff::BackoffSchedule;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{EventBus, QueueError, QueueEvent, QueueStatus};
use crate::ports::{Clock, ConnectionEvent, IdGenerator, ListStore, StoreError, SystemClock, generator_for};
use crate::telemetry::{self, ErrorKind};

/// Mutable queue state.
#[derive(Debug)]
struct QueueState {
    status: QueueStatus,
    /// Consecutive pause cycles not yet eased by sustained health.
    pause_backoff_index: usize,
    /// Bumped on every pause; timers compare against it.
    pause_cycle: u64,
    disconnects: u64,
}

struct QueueInner {
    key: String,
    work_key: String,
    max_size: u64,
    backoff: BackoffSchedule,
    config: QueueConfig,
    store: Arc<dyn ListStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<QueueState>,
    events: EventBus,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

enum PauseOutcome {
    Ignored,
    Paused {
        cycle: u64,
        index: usize,
        delay: Duration,
    },
    Exhausted {
        attempts: usize,
    },
}

/// A named reliable queue: pending list `<name>` and active list `<name>:active`.
///
/// Cheap to clone; clones share the connection and state. Producers and
/// consumers hold a clone and never open their own connection.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Create a running queue over a connected store.
    ///
    /// Must be called inside a tokio runtime: the queue spawns a task that
    /// follows the store's lifecycle signals.
    pub fn new(store: Arc<dyn ListStore>, config: QueueConfig) -> Result<Self, QueueError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ListStore>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        if !store.is_connected() {
            return Err(QueueError::Configuration(
                "store is not connected".to_string(),
            ));
        }

        let key = config.name.clone();
        let work_key = format!("{}:active", config.name);
        let ids = generator_for(config.id_strategy, Arc::clone(&clock));
        let lifecycle = store.lifecycle();

        let inner = Arc::new(QueueInner {
            key,
            work_key,
            max_size: config.max_size,
            backoff: config.backoff_schedule(),
            config,
            store,
            clock,
            ids,
            state: Mutex::new(QueueState {
                status: QueueStatus::Running,
                pause_backoff_index: 0,
                pause_cycle: 0,
                disconnects: 0,
            }),
            events: EventBus::default(),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(follow_lifecycle(Arc::downgrade(&inner), lifecycle));
        *inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(queue = %inner.key, max_size = inner.max_size, "queue running");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.key
    }

    /// Pending list key.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Active (in-flight) list key.
    pub fn work_key(&self) -> &str {
        &self.inner.work_key
    }

    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.lock_state().status
    }

    pub fn pause_backoff_index(&self) -> usize {
        self.inner.lock_state().pause_backoff_index
    }

    /// Store-close events observed so far.
    pub fn disconnects(&self) -> u64 {
        self.inner.lock_state().disconnects
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Connected and running.
    pub fn is_running(&self) -> bool {
        self.inner.store.is_connected() && self.status() == QueueStatus::Running
    }

    /// Connected and paused.
    pub fn is_paused(&self) -> bool {
        self.inner.store.is_connected() && self.status() == QueueStatus::Paused
    }

    /// Move to the status named by `label`.
    ///
    /// Goes through the regular transitions: `paused` pauses (with backoff),
    /// `running` resumes a paused queue, `stopping`/`stopped` stop it. The
    /// current status is a no-op; unknown labels and unreachable targets fail.
    pub async fn set_status_label(&self, label: &str) -> Result<(), QueueError> {
        let to: QueueStatus = label.parse()?;
        let from = self.status();
        if from == to {
            return Ok(());
        }
        let moved = match to {
            QueueStatus::Paused => self.pause().await?,
            QueueStatus::Running => self.resume_cycle(None),
            QueueStatus::Stopping | QueueStatus::Stopped => {
                self.stop().await?;
                true
            }
        };
        if moved {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition { from, to })
        }
    }

    /// Pause a running queue and schedule its automatic resume.
    ///
    /// Returns `Ok(false)` when the queue was not running. Fails with
    /// `CircuitExhausted` (and stops the queue) once the backoff schedule is
    /// used up.
    pub async fn pause(&self) -> Result<bool, QueueError> {
        let backoff = &self.inner.backoff;
        let outcome = self.update(|state| {
            if state.status != QueueStatus::Running {
                return PauseOutcome::Ignored;
            }
            state.pause_backoff_index += 1;
            state.pause_cycle += 1;
            match backoff.delay_for(state.pause_backoff_index) {
                Some(delay) => {
                    state.status = QueueStatus::Paused;
                    PauseOutcome::Paused {
                        cycle: state.pause_cycle,
                        index: state.pause_backoff_index,
                        delay,
                    }
                }
                None => {
                    state.status = QueueStatus::Stopping;
                    PauseOutcome::Exhausted {
                        attempts: state.pause_backoff_index,
                    }
                }
            }
        });

        match outcome {
            PauseOutcome::Ignored => Ok(false),
            PauseOutcome::Paused {
                cycle,
                index,
                delay,
            } => {
                info!(
                    queue = %self.inner.key,
                    backoff_index = index,
                    resume_in_ms = delay.as_millis() as u64,
                    "queue paused"
                );
                self.inner.events.emit(QueueEvent::Paused {
                    backoff_index: index,
                    resume_in: delay,
                });
                self.schedule(delay, move |queue| {
                    queue.resume_cycle(Some(cycle));
                });
                Ok(true)
            }
            PauseOutcome::Exhausted { attempts } => {
                error!(queue = %self.inner.key, attempts, "pause backoff exhausted, stopping queue");
                telemetry::record_error(&self.inner.key, ErrorKind::Circuit);
                self.inner
                    .events
                    .emit(QueueEvent::CircuitExhausted { attempts });
                if let Err(err) = self.inner.store.quit().await {
                    warn!(queue = %self.inner.key, error = %err, "store quit failed");
                }
                self.on_store_closed();
                Err(QueueError::CircuitExhausted {
                    queue: self.inner.key.clone(),
                    attempts,
                })
            }
        }
    }

    /// Resume a paused queue. Returns whether the queue is now running.
    pub fn resume(&self) -> bool {
        self.resume_cycle(None);
        self.is_running()
    }

    /// Gracefully close the store connection.
    ///
    /// Fails with `AlreadyClosing` when the queue is stopped or stopping.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let proceed = self.update(|state| {
            if state.status.is_closing() {
                false
            } else {
                state.status = QueueStatus::Stopping;
                true
            }
        });
        if !proceed {
            return Err(QueueError::AlreadyClosing);
        }

        info!(queue = %self.inner.key, "stopping queue");
        let result = self.inner.store.quit().await;
        self.on_store_closed();
        result.map_err(|err| {
            self.report_store_error(&err);
            err.into()
        })
    }

    /// Length of the pending list.
    pub async fn pending(&self) -> Result<u64, QueueError> {
        self.length(&self.inner.key).await
    }

    /// Length of the active list.
    pub async fn processing(&self) -> Result<u64, QueueError> {
        self.length(&self.inner.work_key).await
    }

    async fn length(&self, key: &str) -> Result<u64, QueueError> {
        self.inner.store.llen(key).await.map_err(|err| {
            self.report_store_error(&err);
            err.into()
        })
    }

    pub(crate) fn store(&self) -> &Arc<dyn ListStore> {
        &self.inner.store
    }

    pub(crate) fn ids(&self) -> &dyn IdGenerator {
        self.inner.ids.as_ref()
    }

    pub(crate) fn not_running(&self) -> QueueError {
        QueueError::NotRunning {
            queue: self.inner.key.clone(),
            status: self.status(),
        }
    }

    fn report_store_error(&self, err: &StoreError) {
        warn!(queue = %self.inner.key, error = %err, "store command failed");
        telemetry::record_error(&self.inner.key, ErrorKind::Store);
        self.inner.events.emit(QueueEvent::StoreError {
            message: err.to_string(),
        });
    }

    /// The single mutation point for queue state.
    ///
    /// `StatusChanged` goes out under the lock so subscribers see changes in
    /// the order they happened.
    fn update<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut state = self.inner.lock_state();
        let from = state.status;
        let result = f(&mut state);
        let to = state.status;
        if from != to {
            info!(queue = %self.inner.key, %from, %to, "queue status changed");
            self.inner
                .events
                .emit(QueueEvent::StatusChanged { from, to });
        }
        result
    }

    /// Paused -> Running. With `expected_cycle`, only if no newer pause happened.
    fn resume_cycle(&self, expected_cycle: Option<u64>) -> bool {
        let resumed = self.update(|state| {
            let same_cycle = expected_cycle.is_none_or(|cycle| cycle == state.pause_cycle);
            if state.status != QueueStatus::Paused || !same_cycle {
                return None;
            }
            state.status = QueueStatus::Running;
            Some((state.pause_cycle, state.pause_backoff_index))
        });

        let Some((cycle, index)) = resumed else {
            if expected_cycle.is_some() {
                debug!(queue = %self.inner.key, "stale resume timer ignored");
            }
            return false;
        };

        info!(queue = %self.inner.key, backoff_index = index, "queue resumed");
        self.schedule_stability_check(cycle, index);
        true
    }

    fn schedule_stability_check(&self, cycle: u64, index: usize) {
        if let Some(delay) = self.inner.backoff.delay_for(index) {
            self.schedule(delay, move |queue| queue.ease_backoff(cycle));
        }
    }

    /// Still running since the resume of `cycle`: lower the backoff penalty by one.
    fn ease_backoff(&self, cycle: u64) {
        let eased = {
            let mut state = self.inner.lock_state();
            let healthy = state.status == QueueStatus::Running && state.pause_cycle == cycle;
            if healthy && state.pause_backoff_index > 0 {
                state.pause_backoff_index -= 1;
                Some(state.pause_backoff_index)
            } else {
                None
            }
        };

        if let Some(index) = eased {
            debug!(queue = %self.inner.key, backoff_index = index, "queue stable, backoff eased");
            self.schedule_stability_check(cycle, index);
        }
    }

    fn schedule(&self, delay: Duration, action: impl FnOnce(&Queue) + Send + 'static) {
        let queue = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = queue.upgrade() {
                action(&Queue { inner });
            }
        });
    }

    fn on_store_closed(&self) {
        let ended = self.update(|state| {
            if state.status == QueueStatus::Stopped {
                false
            } else {
                state.status = QueueStatus::Stopped;
                state.disconnects += 1;
                true
            }
        });
        if ended {
            info!(queue = %self.inner.key, "store connection ended");
            self.inner.events.emit(QueueEvent::StoreEnded);
        }
    }

    async fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected | ConnectionEvent::Ready => {
                if self.status() == QueueStatus::Paused {
                    debug!(queue = %self.inner.key, "store ready, resuming");
                    self.resume_cycle(None);
                }
            }
            ConnectionEvent::Reconnecting { attempt } => {
                warn!(queue = %self.inner.key, attempt, "store reconnecting");
                if let Err(err) = self.pause().await {
                    error!(queue = %self.inner.key, error = %err, "queue gave up on the store");
                }
            }
            ConnectionEvent::Error(message) => {
                warn!(queue = %self.inner.key, %message, "store error");
                telemetry::record_error(&self.inner.key, ErrorKind::Connection);
                self.inner.events.emit(QueueEvent::StoreError { message });
            }
            ConnectionEvent::Closed => self.on_store_closed(),
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("key", &self.inner.key)
            .field("work_key", &self.inner.work_key)
            .field("max_size", &self.inner.max_size)
            .field("status", &self.status())
            .finish()
    }
}

async fn follow_lifecycle(
    queue: Weak<QueueInner>,
    mut lifecycle: broadcast::Receiver<ConnectionEvent>,
) {
    loop {
        let event = match lifecycle.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed store lifecycle events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(inner) = queue.upgrade() else {
            break;
        };
        Queue { inner }.on_connection_event(event).await;
    }
}
