//! # Context Pipeline
//!
//! Supplies background knowledge to generation calls in one of two ways:
//!
//! - [`Retriever`]: embeds the outline node pool lazily and returns the
//!   top-K nodes by cosine similarity to a query
//! - [`Compressor`]: asks a lighter model to reduce free text to entities
//!   and facts, serialized as a dense tagged string
//!
//! Both are best-effort helpers for the generation executor.

pub mod compression;
pub mod embedding;
pub mod retrieval;
pub mod similarity;

pub use compression::{CompactContext, CompressionOutcome, Compressor, Entity, FactSheet};
pub use embedding::Embedder;
pub use retrieval::{RankedContext, RankedEntry, RetrievalOptions, Retriever};
pub use similarity::cosine_similarity;
