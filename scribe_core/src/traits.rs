//! Core traits for the orchestration engine
//!
//! Boundary contracts for the external collaborators: model endpoints and the
//! record store that persists tasks, logs and credential counters.

use async_trait::async_trait;
use errors::{ProviderError, StoreError};

use crate::types::{
    CredentialId, CredentialStatus, GenerationRequest, GenerationResponse, LogEntry, Task,
    TaskFilter, TaskId
};

/// A generative text endpoint.
///
/// Implementations classify every failure into an [`errors::ErrorKind`] at
/// the point it is observed.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError>;
}

/// An embedding endpoint of fixed dimensionality per deployment.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Known dimensionality, if the provider can tell ahead of time.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Task records keyed by id with full lifecycle fields.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Newest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    async fn delete_task(&self, id: &TaskId) -> Result<bool, StoreError>;
}

/// Append-only log records keyed by task id.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_log(&self, task_id: &TaskId, entry: &LogEntry) -> Result<(), StoreError>;

    /// In append order.
    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>, StoreError>;

    async fn delete_logs(&self, task_id: &TaskId) -> Result<(), StoreError>;
}

/// Credential records keyed by id with status and counters.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn upsert_credential(&self, status: &CredentialStatus) -> Result<(), StoreError>;

    async fn get_credential(&self, id: &CredentialId)
    -> Result<Option<CredentialStatus>, StoreError>;

    async fn list_credentials(&self) -> Result<Vec<CredentialStatus>, StoreError>;
}
