use crate::queue::TaskReporter;
use async_trait::async_trait;
use scribe_core::{Task, TaskError, TaskId, TaskOutput};
use tokio_util::sync::CancellationToken;

/// Runs one admitted task to completion.
///
/// The scheduler owns every state transition; an executor only reports
/// progress and log lines through [`ExecutionContext::reporter`] and returns
/// the outcome. A panic inside `execute` is caught and recorded as a failure.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: Task, ctx: ExecutionContext) -> Result<TaskOutput, TaskError>;
}

pub struct ExecutionContext {
    task_id: TaskId,
    cancel: CancellationToken,
    reporter: TaskReporter
}

impl ExecutionContext {
    pub(crate) fn new(task_id: TaskId, cancel: CancellationToken, reporter: TaskReporter) -> Self {
        Self {
            task_id,
            cancel,
            reporter
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Fires when the task is cancelled.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn reporter(&self) -> &TaskReporter {
        &self.reporter
    }
}
