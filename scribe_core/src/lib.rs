//! # Scribe Core
//!
//! Shared domain types and boundary traits for the orchestration engine.
//!
//! - [`types`]: tasks, credentials, context nodes, invocation attempts, events
//! - [`traits`]: generation/embedding endpoints and record stores

pub mod traits;
pub mod types;

pub use traits::{CredentialStore, EmbeddingProvider, GenerationProvider, LogStore, TaskStore};
pub use types::*;
