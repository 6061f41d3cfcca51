use async_trait::async_trait;
use dashmap::DashMap;
use errors::StoreError;
use scribe_core::{
    CredentialId, CredentialStatus, CredentialStore, LogEntry, LogStore, Task, TaskFilter, TaskId,
    TaskStore
};

/// Process-local store backing all three record collections.
///
/// Each collection is a sharded map, so writes to different tasks or
/// credentials never contend on one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: DashMap<TaskId, Task>,
    logs: DashMap<TaskId, Vec<LogEntry>>,
    credentials: DashMap<CredentialId, CredentialStatus>
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(id).map(|t| t.value().clone()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| filter.matches(t.value()))
            .map(|t| t.value().clone())
            .collect();

        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<bool, StoreError> {
        let removed = self.tasks.remove(id).is_some();
        if removed {
            tracing::debug!(task_id = %id, "Deleted task record");
        }
        Ok(removed)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_log(&self, task_id: &TaskId, entry: &LogEntry) -> Result<(), StoreError> {
        self.logs
            .entry(task_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self
            .logs
            .get(task_id)
            .map(|l| l.value().clone())
            .unwrap_or_default())
    }

    async fn delete_logs(&self, task_id: &TaskId) -> Result<(), StoreError> {
        self.logs.remove(task_id);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert_credential(&self, status: &CredentialStatus) -> Result<(), StoreError> {
        self.credentials.insert(status.id.clone(), status.clone());
        Ok(())
    }

    async fn get_credential(
        &self,
        id: &CredentialId
    ) -> Result<Option<CredentialStatus>, StoreError> {
        Ok(self.credentials.get(id).map(|c| c.value().clone()))
    }

    async fn list_credentials(&self) -> Result<Vec<CredentialStatus>, StoreError> {
        let mut all: Vec<_> = self
            .credentials
            .iter()
            .map(|c| c.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scribe_core::{
        LogLevel, PolishRequest, TaskKind, TaskPayload, TaskSpec, TaskStatus
    };

    fn polish_task(text: &str) -> Task {
        Task::new(
            TaskId::generate(),
            TaskSpec::new(TaskPayload::Polish(PolishRequest {
                text: text.to_string(),
                instructions: None,
                language: "en".to_string()
            }))
        )
    }

    #[tokio::test]
    async fn test_task_roundtrip_and_delete() {
        let store = MemoryStore::new();
        let mut task = polish_task("draft");
        store.upsert_task(&task).await.unwrap();

        task.transition(TaskStatus::Running).unwrap();
        store.upsert_task(&task).await.unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(store.task_count(), 1);

        assert!(store.delete_task(&task.id).await.unwrap());
        assert!(!store.delete_task(&task.id).await.unwrap());
        assert!(store.get_task(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_with_limit() {
        let store = MemoryStore::new();
        let mut older = polish_task("older");
        older.created_at -= Duration::seconds(10);
        let newer = polish_task("newer");
        store.upsert_task(&older).await.unwrap();
        store.upsert_task(&newer).await.unwrap();

        let all = store.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(all[0].id, newer.id);
        assert_eq!(all[1].id, older.id);

        let limited = store
            .list_tasks(&TaskFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let none = store
            .list_tasks(&TaskFilter {
                kind: Some(TaskKind::Outline),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_logs_keep_append_order() {
        let store = MemoryStore::new();
        let id = TaskId::generate();
        for i in 0..5 {
            store
                .append_log(&id, &LogEntry::new(LogLevel::Info, format!("step {i}")))
                .await
                .unwrap();
        }

        let logs = store.list_logs(&id).await.unwrap();
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["step 0", "step 1", "step 2", "step 3", "step 4"]);

        store.delete_logs(&id).await.unwrap();
        assert!(store.list_logs(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_records() {
        let store = MemoryStore::new();
        let mut status = CredentialStatus::new(CredentialId::new("key-1").unwrap());
        store.upsert_credential(&status).await.unwrap();

        status.total_failures = 4;
        store.upsert_credential(&status).await.unwrap();

        let loaded = store.get_credential(&status.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_failures, 4);
        assert_eq!(store.list_credentials().await.unwrap().len(), 1);
    }
}
