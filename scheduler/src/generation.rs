use crate::executor::{ExecutionContext, TaskExecutor};
use crate::prompts::build_prompt;
use crate::sink::TaskLogSink;
use async_trait::async_trait;
use config::{InvocationConfig, RetrievalConfig};
use context::{Compressor, RetrievalOptions, Retriever};
use errors::{ContextError, ErrorKind};
use invocation::{InvocationRequest, ResilientInvoker};
use scribe_core::{ContextPlan, LogLevel, Task, TaskError, TaskOutput};
use std::sync::Arc;
use tracing::{debug, warn};
use utils::estimate_tokens;

pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_CONTEXT_READY: u8 = 40;
pub const PROGRESS_GENERATED: u8 = 90;

/// Executes writing tasks: context, prompt, resilient generation.
pub struct GenerationExecutor {
    invoker: Arc<ResilientInvoker>,
    retriever: Option<Arc<Retriever>>,
    compressor: Option<Arc<Compressor>>,
    retrieval: RetrievalConfig,
    default_model: String,
    default_fallback_model: Option<String>
}

impl GenerationExecutor {
    pub fn new(invoker: Arc<ResilientInvoker>, invocation: &InvocationConfig) -> Self {
        Self {
            invoker,
            retriever: None,
            compressor: None,
            retrieval: RetrievalConfig::default(),
            default_model: invocation.default_model.clone(),
            default_fallback_model: invocation.fallback_model.clone()
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<Retriever>, config: RetrievalConfig) -> Self {
        self.retriever = Some(retriever);
        self.retrieval = config;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Assembles background context according to the task's plan.
    async fn prepare_context(
        &self,
        task: &Task,
        ctx: &ExecutionContext
    ) -> Result<String, TaskError> {
        let plan: &ContextPlan = &task.spec.context;
        let mut sections: Vec<String> = Vec::new();

        if plan.strategy.retrieves() {
            match &self.retriever {
                Some(retriever) => {
                    if let Some(rendered) = self.retrieve(retriever, task, ctx).await? {
                        sections.push(rendered);
                    }
                }
                None => {
                    ctx.reporter()
                        .log(
                            LogLevel::Warn,
                            "Retrieval requested but no embedding provider is configured"
                        )
                        .await;
                }
            }
        }

        if let Some(raw) = plan.raw_context.as_deref()
            && !raw.trim().is_empty()
        {
            sections.push(raw.trim().to_string());
        }

        let mut context = sections.join("\n\n");
        if plan.strategy.compresses()
            && !context.is_empty()
            && let Some(compressor) = &self.compressor
        {
            let sink = TaskLogSink::new(ctx.reporter().clone(), "Compression");
            let compact = compressor
                .compress(&context, task.spec.payload.language(), ctx.cancel_token(), &sink)
                .await;
            ctx.reporter()
                .log(
                    LogLevel::Info,
                    format!(
                        "Context compression {}: {} -> {} tokens",
                        compact.outcome, compact.tokens_before, compact.tokens_after
                    )
                )
                .await;
            context = compact.text;
        }

        if ctx.is_cancelled() {
            return Err(TaskError::new(ErrorKind::Cancelled, "cancelled while preparing context"));
        }
        Ok(context)
    }

    /// Returns the rendered top-K context, or `None` when retrieval failed or
    /// found nothing. Only cancellation is an error.
    async fn retrieve(
        &self,
        retriever: &Retriever,
        task: &Task,
        ctx: &ExecutionContext
    ) -> Result<Option<String>, TaskError> {
        let plan = &task.spec.context;
        let query = plan
            .query
            .clone()
            .unwrap_or_else(|| task.spec.payload.retrieval_query());
        let mut options = RetrievalOptions::from(&self.retrieval);
        if let Some(top_k) = plan.top_k {
            options.top_k = top_k;
        }
        if let Some(threshold) = plan.score_threshold {
            options.score_threshold = threshold;
        }

        let mut nodes = plan.nodes.clone();
        match retriever
            .retrieve(&query, &mut nodes, options, ctx.cancel_token())
            .await
        {
            Ok(ranked) => {
                ctx.reporter()
                    .log(
                        LogLevel::Info,
                        format!(
                            "Retrieved {} of {} context nodes",
                            ranked.len(),
                            ranked.candidates
                        )
                    )
                    .await;
                Ok((!ranked.is_empty()).then(|| ranked.render()))
            }
            Err(ContextError::Cancelled) => Err(TaskError::new(
                ErrorKind::Cancelled,
                "cancelled during context retrieval"
            )),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Context retrieval failed, continuing without it");
                ctx.reporter()
                    .log(
                        LogLevel::Warn,
                        format!("Context retrieval failed, continuing without it: {e}")
                    )
                    .await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for GenerationExecutor {
    async fn execute(&self, task: Task, ctx: ExecutionContext) -> Result<TaskOutput, TaskError> {
        ctx.reporter().progress(PROGRESS_STARTED).await;

        let context = self.prepare_context(&task, &ctx).await?;
        ctx.reporter().progress(PROGRESS_CONTEXT_READY).await;

        let prompt = build_prompt(&task.spec.payload, &context);
        let model = task
            .spec
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let fallback_model = task
            .spec
            .fallback_model
            .clone()
            .or_else(|| self.default_fallback_model.clone());
        let request = InvocationRequest::new(model, prompt.user)
            .with_system_instruction(prompt.system)
            .with_fallback_model(fallback_model);

        let sink = TaskLogSink::new(ctx.reporter().clone(), "Generation");
        let response = self
            .invoker
            .invoke(&request, ctx.cancel_token(), &sink)
            .await
            .map_err(TaskError::from)?;
        ctx.reporter().progress(PROGRESS_GENERATED).await;

        if response.used_fallback {
            ctx.reporter()
                .log(
                    LogLevel::Warn,
                    format!("Result produced by fallback model {}", response.model)
                )
                .await;
        }
        debug!(
            task_id = %task.id,
            model = %response.model,
            attempts = response.attempts.len(),
            "Generation finished"
        );

        Ok(TaskOutput {
            text: response.text,
            model: response.model,
            usage: response.usage,
            attempts: response.attempts,
            context_tokens: if context.is_empty() {
                0
            } else {
                estimate_tokens(&context)
            }
        })
    }
}
