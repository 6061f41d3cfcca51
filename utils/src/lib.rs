//! # Scribe Utilities
//!
//! Hashing and token estimation shared across crates.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content string
///
/// Used to detect edits to context node descriptions so cached embeddings
/// can be invalidated.
///
/// # Examples
///
/// ```
/// use utils::compute_content_hash;
///
/// let hash = compute_content_hash("hello world");
/// assert_eq!(hash.len(), 64);
/// ```
#[must_use]
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rough token count for budgeting and reporting.
///
/// Takes the larger of a character-based (~4 chars per token) and a
/// word-based (~1.3 tokens per word) estimate.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let word_count = text.split_whitespace().count();
    let char_count = text.chars().count();

    let char_based = (char_count as f64 / 4.0).ceil() as u32;
    let word_based = (word_count as f64 * 1.3).ceil() as u32;

    char_based.max(word_based)
}
