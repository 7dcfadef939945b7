//! App - long-running loops built on the queue primitives.
//!
//! # Components
//! - **WorkerGroup**: pop → handle → ack / requeue / discard
//! - **TimeoutMonitor**: periodic stale-claim probe

pub mod monitor_loop;
pub mod worker_loop;

pub use self::monitor_loop::{MonitorHandle, TimeoutMonitor};
pub use self::worker_loop::{HandlerError, TaskHandler, WorkerGroup};
