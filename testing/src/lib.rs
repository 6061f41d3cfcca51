//! Shared test doubles for the Scribe workspace.
//!
//! - [`ScriptedGenerationProvider`]: replays queued responses and errors per
//!   model, records every call, and can hold calls until released
//! - [`KeywordEmbeddingProvider`]: deterministic embeddings
//! - fixtures for common task specs and context trees

mod fixtures;
mod providers;

pub use fixtures::*;
pub use providers::*;
