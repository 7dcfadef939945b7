//! Domain model (ids, task envelope, statuses, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;
pub mod task_status;

pub use self::errors::QueueError;
pub use self::events::{EventBus, QueueEvent};
pub use self::ids::{IdStrategy, TaskId};
pub use self::state::QueueStatus;
pub use self::task::{
    Completion, LogEntry, ProcessingDuration, StatusChange, Task, TaskRecord, canonical_json,
};
pub use self::task_status::TaskStatus;
