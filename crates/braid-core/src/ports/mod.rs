//! Ports - abstraction layer
//!
//! Each trait is the seam to something outside the process (the list store,
//! wall-clock time) or to a policy that deployments choose (task ids).
//!
//! # Ports
//! - `ListStore`: Redis-compatible list commands + connection lifecycle
//! - `Clock`: timestamps for the task audit trail
//! - `IdGenerator`: content-hash or random task ids

pub mod clock;
pub mod id_generator;
pub mod list_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{ContentHashGenerator, IdGenerator, UlidGenerator, generator_for};
pub use self::list_store::{ConnectionEvent, ListStore, StoreError};
