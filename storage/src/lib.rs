//! # Storage
//!
//! Implementations of the persisted state layout: task records keyed by id,
//! append-only log records keyed by task id, and credential records.

pub mod memory;

pub use memory::MemoryStore;
