//! # Scribe Errors
//!
//! Error taxonomy shared by every orchestration crate.
//!
//! Classification happens exactly once: the provider adapter that first
//! observes a failure assigns an [`ErrorKind`], and every layer above it
//! (retry policy, credential accounting, task records) reads that field
//! instead of inspecting messages.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

/// Structured classification of a failed provider interaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limit or quota exhaustion signalled by the provider.
    QuotaExceeded,
    /// Service unavailable, bad gateway or any other server-side error.
    ServiceUnavailable,
    /// Transport failure before a response was received.
    NetworkFailure,
    /// Gateway timeout or the local call timeout elapsed.
    Timeout,
    /// The provider refused to produce content.
    ContentPolicyBlocked,
    /// The response could not be decoded or did not match the schema.
    MalformedResponse,
    /// No active credential is left in the pool.
    NoCredentialAvailable,
    /// The caller cancelled the work.
    Cancelled,
    /// The credential itself was rejected.
    Unauthorized,
    /// Any other client-side rejection.
    InvalidRequest,
    /// The task executor itself crashed.
    Internal
}

impl ErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::QuotaExceeded
                | ErrorKind::ServiceUnavailable
                | ErrorKind::NetworkFailure
                | ErrorKind::Timeout
                | ErrorKind::Unauthorized
        )
    }

    pub fn is_rate_limit(self) -> bool {
        self == ErrorKind::QuotaExceeded
    }

    pub fn is_network(self) -> bool {
        matches!(self, ErrorKind::NetworkFailure | ErrorKind::Timeout)
    }

    /// Whether the failure is attributed to the credential used for the call
    /// and therefore increments its consecutive-failure counter.
    pub fn counts_against_credential(self) -> bool {
        matches!(
            self,
            ErrorKind::QuotaExceeded
                | ErrorKind::ServiceUnavailable
                | ErrorKind::NetworkFailure
                | ErrorKind::Timeout
                | ErrorKind::Unauthorized
        )
    }
}

/// Failure reported by a generation or embedding endpoint.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider-suggested wait before the next attempt, if any.
    pub retry_after: Option<Duration>
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Terminal failure of a resilient invocation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} after {attempts} attempt(s): {message}")]
pub struct InvocationError {
    pub kind: ErrorKind,
    /// Last underlying provider message.
    pub message: String,
    pub attempts: u32
}

impl InvocationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts
        }
    }

    pub fn cancelled(attempts: u32) -> Self {
        Self::new(ErrorKind::Cancelled, "invocation cancelled", attempts)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Credential pool errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CredentialError {
    #[error("No active credential available")]
    NoCredentialAvailable,

    #[error("Credential not found: {id}")]
    NotFound { id: String },

    #[error("Credential already registered: {id}")]
    AlreadyExists { id: String }
}

/// Record store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found in {collection}: {id}")]
    NotFound { collection: String, id: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Store backend unavailable: {reason}")]
    Unavailable { reason: String }
}

/// Task scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Invalid max_concurrent {value}: must be at least 1")]
    InvalidConcurrency { value: usize },

    #[error("Task {id} is {status} and cannot be purged")]
    NotPurgeable { id: String, status: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError)
}

/// Context retrieval errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Context retrieval cancelled")]
    Cancelled
}
