use crate::queue::TaskReporter;
use async_trait::async_trait;
use errors::ErrorKind;
use invocation::AttemptSink;
use scribe_core::{AttemptOutcome, InvocationAttempt, LogLevel};
use std::time::Duration;

/// Writes one task log entry per invocation attempt.
pub struct TaskLogSink {
    reporter: TaskReporter,
    stage: &'static str
}

impl TaskLogSink {
    pub fn new(reporter: TaskReporter, stage: &'static str) -> Self {
        Self { reporter, stage }
    }
}

pub(crate) fn describe_attempt(stage: &str, attempt: &InvocationAttempt) -> (LogLevel, String) {
    let credential = attempt
        .credential_id
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    let target = if attempt.fallback {
        format!("{} (fallback)", attempt.model)
    } else {
        attempt.model.clone()
    };

    match attempt.outcome {
        AttemptOutcome::Success => (
            LogLevel::Info,
            format!(
                "{stage} attempt {} on {target} succeeded in {}ms with credential {credential} ({} tokens)",
                attempt.index, attempt.latency_ms, attempt.usage.total_tokens
            )
        ),
        outcome => {
            let kind = attempt
                .error_kind
                .map_or_else(|| "unknown".to_string(), |k| k.to_string());
            let level = if outcome == AttemptOutcome::RetryableFailure {
                LogLevel::Warn
            } else {
                LogLevel::Error
            };
            (
                level,
                format!(
                    "{stage} attempt {} on {target} failed with credential {credential}: {kind}: {}",
                    attempt.index,
                    attempt.error_message.as_deref().unwrap_or_default()
                )
            )
        }
    }
}

#[async_trait]
impl AttemptSink for TaskLogSink {
    async fn record(&self, attempt: &InvocationAttempt) {
        let (level, message) = describe_attempt(self.stage, attempt);
        self.reporter.log(level, message).await;
    }

    async fn backoff(&self, next_index: u32, delay: Duration, cause: ErrorKind) {
        self.reporter
            .log(
                LogLevel::Debug,
                describe_backoff(self.stage, next_index, delay, cause)
            )
            .await;
    }
}

fn describe_backoff(stage: &str, next_index: u32, delay: Duration, cause: ErrorKind) -> String {
    format!(
        "{stage} backing off {}ms before attempt {next_index} ({cause})",
        delay.as_millis()
    )
}
