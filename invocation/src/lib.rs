//! # Resilient Invocation
//!
//! Wraps a [`scribe_core::GenerationProvider`] with credential rotation,
//! per-call timeouts, classification-aware exponential backoff and a single
//! fallback-model attempt after quota exhaustion.

pub mod backoff;
pub mod invoker;
pub mod sink;

pub use backoff::BackoffPolicy;
pub use invoker::{InvocationRequest, InvocationResponse, ResilientInvoker};
pub use sink::{AttemptSink, NoopSink, RecordingSink};
