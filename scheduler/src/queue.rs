use crate::executor::{ExecutionContext, TaskExecutor};
use config::SchedulerConfig;
use dashmap::DashMap;
use errors::{ErrorKind, SchedulerError};
use observability::EngineTelemetry;
use parking_lot::Mutex;
use scribe_core::{
    LogEntry, LogLevel, LogStore, QueueStatus, Task, TaskError, TaskEvent, TaskEventKind,
    TaskFilter, TaskId, TaskOutput, TaskSpec, TaskStats, TaskStatus, TaskStore
};
use std::collections::VecDeque;
use std::sync::Arc;
use storage::MemoryStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    /// Set once the executor has returned; cancellation no longer applies.
    settled: bool,
    done: watch::Sender<Option<Task>>
}

/// Admission state. The only global lock; held for queue bookkeeping only.
struct Admission {
    waiting: VecDeque<TaskId>,
    running: usize,
    max_concurrent: usize
}

struct Inner {
    tasks: DashMap<TaskId, TaskEntry>,
    admission: Mutex<Admission>,
    events: broadcast::Sender<TaskEvent>,
    executor: Arc<dyn TaskExecutor>,
    task_store: Arc<dyn TaskStore>,
    log_store: Arc<dyn LogStore>,
    telemetry: EngineTelemetry
}

/// Returned by [`TaskScheduler::submit`].
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    done: watch::Receiver<Option<Task>>
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Resolves to the task snapshot taken when it reached a terminal state.
    pub async fn wait(&mut self) -> Option<Task> {
        self.done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|snapshot| snapshot.clone())
    }
}

/// Lets an executor append log lines and report progress for its task.
#[derive(Clone)]
pub struct TaskReporter {
    inner: Arc<Inner>,
    id: TaskId
}

impl TaskReporter {
    pub fn task_id(&self) -> &TaskId {
        &self.id
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.inner.append_log(&self.id, level, message.into()).await;
    }

    /// Values at or below the current progress are ignored.
    pub async fn progress(&self, progress: u8) {
        self.inner.set_progress(&self.id, progress);
    }
}

/// Bounded task queue and task registry.
///
/// ## Admission
/// At most `max_concurrent` tasks run at once. Further submissions wait in
/// FIFO order and are admitted as running tasks reach a terminal state.
/// Lowering the bound never preempts running tasks.
///
/// ## Records
/// Every transition and log line is published on the event bus and written
/// through to the task and log stores.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>
}

impl TaskScheduler {
    /// Creates a scheduler backed by a fresh in-memory store.
    pub fn new(config: &SchedulerConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(config, executor, store.clone(), store)
    }

    pub fn with_stores(
        config: &SchedulerConfig,
        executor: Arc<dyn TaskExecutor>,
        task_store: Arc<dyn TaskStore>,
        log_store: Arc<dyn LogStore>
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                admission: Mutex::new(Admission {
                    waiting: VecDeque::new(),
                    running: 0,
                    max_concurrent: config.max_concurrent.max(1)
                }),
                events,
                executor,
                task_store,
                log_store,
                telemetry: EngineTelemetry::new()
            })
        }
    }

    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, SchedulerError> {
        let id = TaskId::generate();
        let mut task = Task::new(id.clone(), spec);
        let entry = LogEntry::new(
            LogLevel::Info,
            format!("Task submitted ({})", task.kind)
        );
        task.logs.push(entry.clone());

        self.inner.task_store.upsert_task(&task).await?;
        self.inner.log_store.append_log(&id, &entry).await?;

        let (done, receiver) = watch::channel(None);
        info!(task_id = %id, kind = %task.kind, "Task submitted");
        self.inner.telemetry.record_task_transition(TaskStatus::Pending);
        self.inner.tasks.insert(
            id.clone(),
            TaskEntry {
                task,
                cancel: CancellationToken::new(),
                settled: false,
                done
            }
        );
        self.inner
            .publish(&id, TaskEventKind::LogAppended { entry });

        self.inner.admission.lock().waiting.push_back(id.clone());
        self.inner.pump();

        Ok(TaskHandle { id, done: receiver })
    }

    /// Requests cancellation.
    ///
    /// A pending task leaves the wait list and is cancelled immediately. A
    /// running task is signalled and becomes `cancelled` once its executor
    /// returns. Returns false for unknown and terminal tasks.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let Some((status, token)) = self
            .inner
            .with_task(id, |e| (e.task.status, e.cancel.clone()))
        else {
            return false;
        };

        match status {
            TaskStatus::Pending => {
                let removed = {
                    let mut admission = self.inner.admission.lock();
                    let before = admission.waiting.len();
                    admission.waiting.retain(|waiting| waiting != id);
                    let removed = admission.waiting.len() != before;
                    self.inner
                        .telemetry
                        .record_queue_length(admission.waiting.len());
                    removed
                };
                token.cancel();
                if removed {
                    self.inner
                        .transition(id, TaskStatus::Cancelled, |_| {}, "Task cancelled before start")
                        .await;
                }
                true
            }
            TaskStatus::Running => {
                // Decided under the entry lock so it cannot interleave with
                // the executor's result being recorded.
                let requested = self.inner.with_task(id, |e| {
                    if e.task.status != TaskStatus::Running || e.settled {
                        return None;
                    }
                    if e.cancel.is_cancelled() {
                        return Some(None);
                    }
                    e.cancel.cancel();
                    let entry = LogEntry::new(LogLevel::Warn, "Cancellation requested");
                    e.task.logs.push(entry.clone());
                    Some(Some(entry))
                });
                match requested.flatten() {
                    None => false,
                    Some(None) => true,
                    Some(Some(entry)) => {
                        self.inner.emit_log(id, entry).await;
                        true
                    }
                }
            }
            _ => false
        }
    }

    /// Cancels every pending and running task. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = self
            .inner
            .tasks
            .iter()
            .filter(|e| !e.task.status.is_terminal())
            .map(|e| e.key().clone())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn status(&self, id: &TaskId) -> Option<Task> {
        self.inner.with_task(id, |e| e.task.clone())
    }

    /// Newest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .filter(|e| filter.matches(&e.task))
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    pub fn logs(&self, id: &TaskId) -> Result<Vec<LogEntry>, SchedulerError> {
        self.inner
            .with_task(id, |e| e.task.logs.clone())
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for entry in self.inner.tasks.iter() {
            match entry.task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1
            }
        }
        stats
    }

    pub fn queue_status(&self) -> QueueStatus {
        let admission = self.inner.admission.lock();
        QueueStatus {
            queue_length: admission.waiting.len(),
            running_count: admission.running,
            max_concurrent: admission.max_concurrent
        }
    }

    /// Changes the concurrency bound for future admissions.
    pub fn configure(&self, max_concurrent: usize) -> Result<(), SchedulerError> {
        if max_concurrent < 1 {
            return Err(SchedulerError::InvalidConcurrency {
                value: max_concurrent
            });
        }

        let previous = {
            let mut admission = self.inner.admission.lock();
            std::mem::replace(&mut admission.max_concurrent, max_concurrent)
        };
        if previous != max_concurrent {
            info!(previous, max_concurrent, "Concurrency bound changed");
        }
        self.inner.pump();
        Ok(())
    }

    /// Removes a terminal task from the registry and the stores.
    pub async fn purge(&self, id: &TaskId) -> Result<(), SchedulerError> {
        let status = self
            .inner
            .with_task(id, |e| e.task.status)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })?;
        if !status.is_terminal() {
            return Err(SchedulerError::NotPurgeable {
                id: id.to_string(),
                status: status.to_string()
            });
        }

        self.inner.tasks.remove(id);
        self.inner.task_store.delete_task(id).await?;
        self.inner.log_store.delete_logs(id).await?;
        debug!(task_id = %id, "Task purged");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn with_task<R>(&self, id: &TaskId, f: impl FnOnce(&mut TaskEntry) -> R) -> Option<R> {
        self.tasks.get_mut(id).map(|mut entry| f(&mut entry))
    }

    fn publish(&self, task_id: &TaskId, kind: TaskEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(TaskEvent {
            task_id: task_id.clone(),
            kind
        });
    }

    async fn append_log(&self, id: &TaskId, level: LogLevel, message: String) {
        let entry = LogEntry::new(level, message);
        if self
            .with_task(id, |e| e.task.logs.push(entry.clone()))
            .is_none()
        {
            return;
        }
        self.emit_log(id, entry).await;
    }

    /// Mirrors an entry already in the task's log to tracing, the log store
    /// and subscribers.
    async fn emit_log(&self, id: &TaskId, entry: LogEntry) {
        match entry.level {
            LogLevel::Error => error!(task_id = %id, "{}", entry.message),
            LogLevel::Warn => warn!(task_id = %id, "{}", entry.message),
            _ => debug!(task_id = %id, "{}", entry.message)
        }
        if let Err(e) = self.log_store.append_log(id, &entry).await {
            warn!(task_id = %id, error = %e, "Failed to persist task log entry");
        }
        self.publish(id, TaskEventKind::LogAppended { entry });
    }

    fn set_progress(&self, id: &TaskId, progress: u8) {
        let changed = self
            .with_task(id, |e| e.task.set_progress(progress).then_some(e.task.progress))
            .flatten();
        if let Some(progress) = changed {
            self.publish(id, TaskEventKind::ProgressChanged { progress });
        }
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.task_store.upsert_task(task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task record");
        }
    }

    /// Applies a transition, logs it and writes the record through.
    ///
    /// Returns the snapshot after the transition, or `None` when the task is
    /// gone or the transition is not allowed from its current state.
    async fn transition(
        &self,
        id: &TaskId,
        next: TaskStatus,
        apply: impl FnOnce(&mut Task),
        message: &str
    ) -> Option<Task> {
        let applied = self.with_task(id, |e| {
            let from = e.task.status;
            let progress_before = e.task.progress;
            match e.task.transition(next) {
                Ok(()) => {
                    apply(&mut e.task);
                    Some((from, progress_before != e.task.progress))
                }
                Err(err) => {
                    debug!(task_id = %id, error = %err, "Transition rejected");
                    None
                }
            }
        });
        let (from, progress_changed) = applied.flatten()?;

        info!(task_id = %id, from = %from, to = %next, "Task state changed");
        self.telemetry.record_task_transition(next);
        self.publish(id, TaskEventKind::StageChanged { from, to: next });
        if progress_changed {
            self.publish(id, TaskEventKind::ProgressChanged { progress: 100 });
        }

        let level = match next {
            TaskStatus::Failed => LogLevel::Error,
            TaskStatus::Cancelled => LogLevel::Warn,
            _ => LogLevel::Info
        };
        self.append_log(id, level, message.to_string()).await;

        let snapshot = self.with_task(id, |e| e.task.clone())?;
        self.persist(&snapshot).await;
        if next.is_terminal() {
            self.with_task(id, |e| e.done.send_replace(Some(snapshot.clone())));
        }
        Some(snapshot)
    }

    /// Admits waiting tasks while capacity allows.
    fn pump(self: &Arc<Self>) {
        let admitted = {
            let mut admission = self.admission.lock();
            let mut admitted = Vec::new();
            while admission.running < admission.max_concurrent {
                let Some(id) = admission.waiting.pop_front() else {
                    break;
                };
                admission.running += 1;
                admitted.push(id);
            }
            self.telemetry.record_running_tasks(admission.running);
            self.telemetry.record_queue_length(admission.waiting.len());
            admitted
        };

        for id in admitted {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run(id).await });
        }
    }

    fn release_slot(self: &Arc<Self>) {
        {
            let mut admission = self.admission.lock();
            admission.running = admission.running.saturating_sub(1);
        }
        self.pump();
    }

    async fn run(self: Arc<Self>, id: TaskId) {
        let Some(task) = self
            .transition(&id, TaskStatus::Running, |_| {}, "Task started")
            .await
        else {
            self.release_slot();
            return;
        };
        let Some(cancel) = self.with_task(&id, |e| e.cancel.clone()) else {
            self.release_slot();
            return;
        };

        let span = info_span!("task", task_id = %id, kind = %task.kind);
        let ctx = ExecutionContext::new(
            id.clone(),
            cancel.clone(),
            TaskReporter {
                inner: Arc::clone(&self),
                id: id.clone()
            }
        );
        let executor = Arc::clone(&self.executor);
        let outcome =
            tokio::spawn(async move { executor.execute(task, ctx).await }.instrument(span)).await;

        self.complete(&id, &cancel, outcome).await;
        self.release_slot();
    }

    async fn complete(
        &self,
        id: &TaskId,
        cancel: &CancellationToken,
        outcome: Result<Result<TaskOutput, TaskError>, JoinError>
    ) {
        let cancelled = self
            .with_task(id, |e| {
                e.settled = true;
                e.cancel.is_cancelled()
            })
            .unwrap_or_else(|| cancel.is_cancelled());
        if cancelled {
            self.transition(id, TaskStatus::Cancelled, |_| {}, "Task cancelled")
                .await;
            return;
        }

        match outcome {
            Ok(Ok(output)) => {
                self.transition(
                    id,
                    TaskStatus::Completed,
                    |task| task.result = Some(output),
                    "Task completed"
                )
                .await;
            }
            Ok(Err(task_error)) => {
                let message = format!("Task failed: {task_error}");
                self.transition(
                    id,
                    TaskStatus::Failed,
                    |task| task.error = Some(task_error),
                    &message
                )
                .await;
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "executor panicked"
                } else {
                    "executor was aborted"
                };
                error!(task_id = %id, error = %join_error, "Task executor crashed");
                let task_error = TaskError::new(ErrorKind::Internal, reason);
                let message = format!("Task failed: {task_error}");
                self.transition(
                    id,
                    TaskStatus::Failed,
                    |task| task.error = Some(task_error),
                    &message
                )
                .await;
            }
        }
    }
}
