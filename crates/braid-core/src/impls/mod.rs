//! Impls - in-process port implementations for development and tests.
//!
//! # Implementations
//! - **InMemoryListStore**: `ListStore` with Redis list semantics
//!
//! The production Redis store lives in the `braid-redis` crate.

pub mod inmem_store;

pub use self::inmem_store::InMemoryListStore;
