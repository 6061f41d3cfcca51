//! # Provider Adapters
//!
//! HTTP clients for OpenAI-compatible chat-completions and embeddings
//! endpoints. This is the only place wire failures are classified into
//! [`errors::ErrorKind`]; everything above reads that field.

pub mod classify;
pub mod openai;

pub use classify::{classify_status, classify_transport};
pub use openai::{AdapterError, OpenAiClient, OpenAiEmbeddingProvider, OpenAiGenerationProvider};
