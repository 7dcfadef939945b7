//! braid-core
//!
//! Reliable work queue over a Redis-style list store.
//!
//! Two lists per queue: pending (`<name>`) and active (`<name>:active`).
//! A producer pushes onto the head of pending; a consumer atomically moves the
//! tail of pending onto active and removes it again on ack. Anything left in
//! active was claimed but never acknowledged, which is what the timeout
//! monitor reports.
//!
//! # Modules
//! - **domain**: task envelope, statuses, ids, errors, events
//! - **ports**: `ListStore`, `Clock`, `IdGenerator`
//! - **queue**: connection-health state machine with pause backoff
//! - **producer** / **consumer**: push with backpressure, pop / ack / requeue
//! - **app**: `WorkerGroup` and `TimeoutMonitor` loops
//! - **impls**: in-memory `ListStore`
//! - **config**: `QueueConfig` and the TOML loader
//! - **telemetry**: error counters and push / claim durations

pub mod app;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod producer;
pub mod queue;
pub mod telemetry;

pub use app::{HandlerError, MonitorHandle, TaskHandler, TimeoutMonitor, WorkerGroup};
pub use config::{ConfigError, ConfigLoader, QueueConfig};
pub use consumer::Consumer;
pub use domain::{IdStrategy, QueueError, QueueEvent, QueueStatus, Task, TaskId, TaskStatus};
pub use producer::Producer;
pub use queue::{BackoffSchedule, Queue};
