use errors::ErrorKind;
use metrics::{counter, gauge, histogram};
use scribe_core::{AttemptOutcome, TaskStatus, TokenUsage};
use std::net::SocketAddr;

/// Metric names and label sets of the engine, in one place.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineTelemetry;

impl EngineTelemetry {
    pub fn new() -> Self {
        Self
    }

    pub fn record_task_transition(&self, to: TaskStatus) {
        counter!("scribe_task_transitions_total", "to" => to.to_string()).increment(1);
    }

    pub fn record_running_tasks(&self, running: usize) {
        gauge!("scribe_tasks_running").set(running as f64);
    }

    pub fn record_queue_length(&self, waiting: usize) {
        gauge!("scribe_tasks_waiting").set(waiting as f64);
    }

    pub fn record_invocation_attempt(
        &self,
        model: &str,
        outcome: AttemptOutcome,
        error_kind: Option<ErrorKind>,
        latency_ms: u64
    ) {
        let labels = [
            ("model", model.to_string()),
            ("outcome", outcome.to_string()),
            (
                "error_kind",
                error_kind.map_or_else(|| "none".to_string(), |k| k.to_string())
            )
        ];
        counter!("scribe_invocation_attempts_total", &labels).increment(1);
        histogram!("scribe_invocation_latency_seconds", "model" => model.to_string())
            .record(latency_ms as f64 / 1000.0);
    }

    pub fn record_fallback_use(&self, model: &str) {
        counter!("scribe_fallback_invocations_total", "model" => model.to_string()).increment(1);
    }

    pub fn record_credential_deactivation(&self, reason: &str) {
        counter!("scribe_credential_deactivations_total", "reason" => reason.to_string())
            .increment(1);
    }

    pub fn record_active_credentials(&self, active: usize) {
        gauge!("scribe_credentials_active").set(active as f64);
    }

    /// `outcome` is one of `applied`, `skipped` or `fallback`.
    pub fn record_compression(&self, outcome: &str, tokens_before: u32, tokens_after: u32) {
        counter!("scribe_compression_total", "outcome" => outcome.to_string()).increment(1);
        if outcome == "applied" && tokens_before > 0 {
            histogram!("scribe_compression_ratio")
                .record(f64::from(tokens_after) / f64::from(tokens_before));
        }
    }

    pub fn record_retrieval(&self, candidates: usize, results: usize, embedded: usize) {
        histogram!("scribe_retrieval_candidates").record(candidates as f64);
        histogram!("scribe_retrieval_results").record(results as f64);
        if embedded > 0 {
            counter!("scribe_embeddings_computed_total").increment(embedded as u64);
        }
    }

    pub fn record_tokens(&self, model: &str, usage: &TokenUsage) {
        counter!("scribe_tokens_total", "model" => model.to_string(), "direction" => "input")
            .increment(usage.input_tokens);
        counter!("scribe_tokens_total", "model" => model.to_string(), "direction" => "output")
            .increment(usage.output_tokens);
    }
}

/// Installs the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics_exporter(
    endpoint: SocketAddr
) -> Result<EngineTelemetry, Box<dyn std::error::Error + Send + Sync>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(endpoint)
        .install()?;

    tracing::info!(%endpoint, "Prometheus exporter listening");
    Ok(EngineTelemetry::new())
}
