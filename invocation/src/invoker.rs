use crate::backoff::BackoffPolicy;
use crate::sink::AttemptSink;
use config::InvocationConfig;
use credentials::CredentialPool;
use errors::{ErrorKind, InvocationError, ProviderError};
use observability::{EngineTelemetry, UsageTracker};
use scribe_core::{
    AttemptOutcome, GenerationProvider, GenerationRequest, GenerationResponse, InvocationAttempt,
    TokenUsage
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// A logical model call, possibly spanning several attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub response_schema: Option<serde_json::Value>,
    /// Tried once after the primary model exhausts its attempts on quota.
    pub fallback_model: Option<String>
}

impl InvocationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_instruction: None,
            response_schema: None,
            fallback_model: None
        }
    }

    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_fallback_model(mut self, model: Option<String>) -> Self {
        self.fallback_model = model.filter(|m| !m.is_empty());
        self
    }

    fn for_model(&self, model: &str) -> GenerationRequest {
        GenerationRequest {
            model: model.to_string(),
            prompt: self.prompt.clone(),
            system_instruction: self.system_instruction.clone(),
            response_schema: self.response_schema.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResponse {
    pub text: String,
    /// Model that produced `text`.
    pub model: String,
    pub usage: TokenUsage,
    pub attempts: Vec<InvocationAttempt>,
    pub used_fallback: bool
}

/// Executes model calls with retry, backoff, credential rotation and
/// quota fallback.
///
/// ## Attempt budget
/// The primary model gets up to `max_attempts` tries. Only retryable kinds
/// are retried; anything else ends the invocation immediately. When the
/// last primary failure is a quota error and a fallback model is set, one
/// extra attempt goes to the fallback model without further delay.
///
/// ## Cancellation
/// Checked before every attempt and during backoff sleeps. An in-flight
/// call is allowed to finish; its result is then discarded.
pub struct ResilientInvoker {
    provider: Arc<dyn GenerationProvider>,
    credentials: Arc<CredentialPool>,
    policy: BackoffPolicy,
    max_attempts: u32,
    call_timeout: Duration,
    usage: UsageTracker,
    telemetry: EngineTelemetry
}

struct Attempted {
    result: Result<GenerationResponse, ProviderError>,
    attempt: InvocationAttempt
}

impl ResilientInvoker {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        credentials: Arc<CredentialPool>,
        config: &InvocationConfig
    ) -> Self {
        Self {
            provider,
            credentials,
            policy: BackoffPolicy::from_config(config),
            max_attempts: config.max_attempts.max(1),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            usage: UsageTracker::new(),
            telemetry: EngineTelemetry::new()
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_usage_tracker(mut self, usage: UsageTracker) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
        sink: &dyn AttemptSink
    ) -> Result<InvocationResponse, InvocationError> {
        let span = info_span!(
            "invoke",
            model = %request.model,
            fallback_model = request.fallback_model.as_deref().unwrap_or("none"),
            max_attempts = self.max_attempts
        );

        async move {
            let mut attempts: Vec<InvocationAttempt> = Vec::new();
            let mut previous_delay = Duration::ZERO;
            let mut last_error: Option<ProviderError> = None;

            for retry in 0..self.max_attempts {
                let mut delay_before = Duration::ZERO;
                if let Some(error) = &last_error {
                    let delay =
                        self.policy
                            .delay(retry, error.kind, previous_delay, error.retry_after);
                    previous_delay = delay;
                    delay_before = delay;

                    let next_index = attempts.len() as u32 + 1;
                    debug!(
                        next_attempt = next_index,
                        delay_ms = delay.as_millis() as u64,
                        cause = %error.kind,
                        "Backing off before retry"
                    );
                    sink.backoff(next_index, delay, error.kind).await;

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(InvocationError::cancelled(attempts.len() as u32));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                if cancel.is_cancelled() {
                    return Err(InvocationError::cancelled(attempts.len() as u32));
                }

                let Attempted { result, attempt } = self
                    .attempt(request, &request.model, attempts.len() as u32 + 1, delay_before, false)
                    .await;
                sink.record(&attempt).await;
                attempts.push(attempt);

                if cancel.is_cancelled() {
                    return Err(InvocationError::cancelled(attempts.len() as u32));
                }

                match result {
                    Ok(response) => {
                        return Ok(self.finish(response, &request.model, attempts, false));
                    }
                    Err(error) if !error.is_retryable() => {
                        warn!(kind = %error.kind, error = %error.message, "Invocation failed fatally");
                        return Err(InvocationError::new(
                            error.kind,
                            error.message,
                            attempts.len() as u32
                        ));
                    }
                    Err(error) => {
                        last_error = Some(error);
                    }
                }
            }

            let Some(error) = last_error else {
                return Err(InvocationError::new(
                    ErrorKind::InvalidRequest,
                    "no attempt was made",
                    0
                ));
            };

            if let Some(fallback) = request.fallback_model.as_deref()
                && error.kind.is_rate_limit()
            {
                info!(
                    primary = %request.model,
                    fallback,
                    "Primary model quota exhausted, trying fallback model"
                );
                self.telemetry.record_fallback_use(fallback);

                let Attempted { result, attempt } = self
                    .attempt(request, fallback, attempts.len() as u32 + 1, Duration::ZERO, true)
                    .await;
                sink.record(&attempt).await;
                attempts.push(attempt);

                if cancel.is_cancelled() {
                    return Err(InvocationError::cancelled(attempts.len() as u32));
                }

                return match result {
                    Ok(response) => Ok(self.finish(response, fallback, attempts, true)),
                    Err(fallback_error) => Err(InvocationError::new(
                        fallback_error.kind,
                        fallback_error.message,
                        attempts.len() as u32
                    ))
                };
            }

            warn!(
                kind = %error.kind,
                attempts = attempts.len(),
                "Invocation exhausted its retry budget"
            );
            Err(InvocationError::new(
                error.kind,
                error.message,
                attempts.len() as u32
            ))
        }
        .instrument(span)
        .await
    }

    fn finish(
        &self,
        response: GenerationResponse,
        model: &str,
        attempts: Vec<InvocationAttempt>,
        used_fallback: bool
    ) -> InvocationResponse {
        InvocationResponse {
            text: response.text,
            model: model.to_string(),
            usage: response.usage,
            attempts,
            used_fallback
        }
    }

    async fn attempt(
        &self,
        request: &InvocationRequest,
        model: &str,
        index: u32,
        delay_before: Duration,
        fallback: bool
    ) -> Attempted {
        let started = Instant::now();

        let (credential_id, result) = match self.credentials.acquire() {
            Ok(credential) => {
                let generation_request = request.for_model(model);
                let call = self
                    .provider
                    .generate(credential.secret(), &generation_request);
                let result = match tokio::time::timeout(self.call_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::new(
                        ErrorKind::Timeout,
                        format!(
                            "call exceeded timeout of {}s",
                            self.call_timeout.as_secs()
                        )
                    ))
                };

                let error_kind = result.as_ref().err().map(|e| e.kind);
                if let Err(e) = self.credentials.report_outcome(credential.id(), error_kind) {
                    debug!(error = %e, "Credential vanished before its outcome was recorded");
                }
                (Some(credential.id().clone()), result)
            }
            Err(e) => (
                None,
                Err(ProviderError::new(
                    ErrorKind::NoCredentialAvailable,
                    e.to_string()
                ))
            )
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let attempt = match &result {
            Ok(response) => InvocationAttempt {
                index,
                model: model.to_string(),
                credential_id,
                outcome: AttemptOutcome::Success,
                error_kind: None,
                error_message: None,
                latency_ms,
                usage: response.usage,
                delay_before_ms: delay_before.as_millis() as u64,
                fallback
            },
            Err(error) => InvocationAttempt {
                index,
                model: model.to_string(),
                credential_id,
                outcome: if error.is_retryable() {
                    AttemptOutcome::RetryableFailure
                } else {
                    AttemptOutcome::FatalFailure
                },
                error_kind: Some(error.kind),
                error_message: Some(error.message.clone()),
                latency_ms,
                usage: TokenUsage::default(),
                delay_before_ms: delay_before.as_millis() as u64,
                fallback
            }
        };

        self.telemetry
            .record_invocation_attempt(model, attempt.outcome, attempt.error_kind, latency_ms);
        match &result {
            Ok(response) => {
                self.usage.record_success(model, &response.usage);
                self.telemetry.record_tokens(model, &response.usage);
                debug!(attempt = index, model, latency_ms, "Attempt succeeded");
            }
            Err(error) => {
                self.usage.record_failure(model);
                warn!(
                    attempt = index,
                    model,
                    kind = %error.kind,
                    error = %error.message,
                    "Attempt failed"
                );
            }
        }

        Attempted { result, attempt }
    }
}
