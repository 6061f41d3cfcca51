//! # Environment Variable Loader
//!
//! Loads configuration from `SCRIBE_*` environment variables.
//!
//! # Naming Convention
//! - `SCRIBE_SCHEDULER_*`: Task queue settings
//! - `SCRIBE_CREDENTIALS_*`: Credential pool settings
//! - `SCRIBE_INVOCATION_*`: Retry and fallback settings
//! - `SCRIBE_RETRIEVAL_*`: Retrieval settings
//! - `SCRIBE_COMPRESSION_*`: Compression settings
//! - `SCRIBE_PROVIDER_*`: Model endpoint settings
//! - `SCRIBE_LOG_*` / `SCRIBE_METRICS_*`: Observability settings

use crate::config::{
    CompressionConfig, Config, CredentialPoolConfig, InvocationConfig, ObservabilityConfig,
    ProviderConfig, RetrievalConfig, SchedulerConfig
};
use std::env;

/// Load configuration from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Environment variables override default values but can be overridden by
/// CLI arguments. Unset or unparsable variables keep the default.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("max attempts: {}", config.invocation.max_attempts);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// - `SCRIBE_SCHEDULER_MAX_CONCURRENT` (default: 2)
/// - `SCRIBE_SCHEDULER_EVENT_CAPACITY` (default: 1024)
/// - `SCRIBE_CREDENTIALS_FAILURE_THRESHOLD` (default: 3)
/// - `SCRIBE_CREDENTIALS_REACTIVATE_AFTER_SECS` (default: unset)
/// - `SCRIBE_INVOCATION_MAX_ATTEMPTS` (default: 3)
/// - `SCRIBE_INVOCATION_BASE_DELAY_MS` (default: 3000)
/// - `SCRIBE_INVOCATION_MAX_DELAY_MS` (default: 60000)
/// - `SCRIBE_INVOCATION_RATE_LIMIT_MULTIPLIER` (default: 3.0)
/// - `SCRIBE_INVOCATION_NETWORK_MULTIPLIER` (default: 1.5)
/// - `SCRIBE_INVOCATION_JITTER_MS` (default: 1000)
/// - `SCRIBE_INVOCATION_CALL_TIMEOUT_SECS` (default: 120)
/// - `SCRIBE_INVOCATION_DEFAULT_MODEL` / `SCRIBE_INVOCATION_FALLBACK_MODEL`
/// - `SCRIBE_RETRIEVAL_TOP_K` (default: 10)
/// - `SCRIBE_RETRIEVAL_SCORE_THRESHOLD` (default: 0.4)
/// - `SCRIBE_RETRIEVAL_MIN_DESCRIPTION_CHARS` (default: 10)
/// - `SCRIBE_RETRIEVAL_EMBED_PACING_MS` (default: 200)
/// - `SCRIBE_COMPRESSION_ENABLED` (default: true)
/// - `SCRIBE_COMPRESSION_MODEL` (default: "gpt-4o-mini")
/// - `SCRIBE_COMPRESSION_MIN_INPUT_CHARS` (default: 400)
/// - `SCRIBE_PROVIDER_BASE_URL`, `SCRIBE_PROVIDER_EMBEDDING_MODEL`
/// - `SCRIBE_PROVIDER_API_KEYS`: Comma separated `id=secret` entries
/// - `SCRIBE_LOG_LEVEL`, `SCRIBE_LOG_JSON`
/// - `SCRIBE_METRICS_ENABLED`, `SCRIBE_METRICS_PORT`
pub fn load_from_env() -> Result<Config, Box<dyn std::error::Error>> {
    Ok(Config {
        scheduler: load_scheduler_from_env()?,
        credentials: load_credentials_from_env()?,
        invocation: load_invocation_from_env()?,
        retrieval: load_retrieval_from_env()?,
        compression: load_compression_from_env()?,
        provider: load_provider_from_env()?,
        observability: load_observability_from_env()?
    })
}

fn load_scheduler_from_env() -> Result<SchedulerConfig, Box<dyn std::error::Error>> {
    let defaults = SchedulerConfig::default();
    Ok(SchedulerConfig {
        max_concurrent: parse_env("SCRIBE_SCHEDULER_MAX_CONCURRENT")
            .unwrap_or(defaults.max_concurrent),
        event_capacity: parse_env("SCRIBE_SCHEDULER_EVENT_CAPACITY")
            .unwrap_or(defaults.event_capacity)
    })
}

fn load_credentials_from_env() -> Result<CredentialPoolConfig, Box<dyn std::error::Error>> {
    let defaults = CredentialPoolConfig::default();
    Ok(CredentialPoolConfig {
        failure_threshold: parse_env("SCRIBE_CREDENTIALS_FAILURE_THRESHOLD")
            .unwrap_or(defaults.failure_threshold),
        reactivate_after_secs: parse_env("SCRIBE_CREDENTIALS_REACTIVATE_AFTER_SECS").ok()
    })
}

fn load_invocation_from_env() -> Result<InvocationConfig, Box<dyn std::error::Error>> {
    let defaults = InvocationConfig::default();
    Ok(InvocationConfig {
        max_attempts: parse_env("SCRIBE_INVOCATION_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
        base_delay_ms: parse_env("SCRIBE_INVOCATION_BASE_DELAY_MS")
            .unwrap_or(defaults.base_delay_ms),
        max_delay_ms: parse_env("SCRIBE_INVOCATION_MAX_DELAY_MS").unwrap_or(defaults.max_delay_ms),
        rate_limit_multiplier: parse_env("SCRIBE_INVOCATION_RATE_LIMIT_MULTIPLIER")
            .unwrap_or(defaults.rate_limit_multiplier),
        network_multiplier: parse_env("SCRIBE_INVOCATION_NETWORK_MULTIPLIER")
            .unwrap_or(defaults.network_multiplier),
        jitter_ms: parse_env("SCRIBE_INVOCATION_JITTER_MS").unwrap_or(defaults.jitter_ms),
        call_timeout_secs: parse_env("SCRIBE_INVOCATION_CALL_TIMEOUT_SECS")
            .unwrap_or(defaults.call_timeout_secs),
        default_model: env::var("SCRIBE_INVOCATION_DEFAULT_MODEL")
            .unwrap_or(defaults.default_model),
        fallback_model: env::var("SCRIBE_INVOCATION_FALLBACK_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
    })
}

fn load_retrieval_from_env() -> Result<RetrievalConfig, Box<dyn std::error::Error>> {
    let defaults = RetrievalConfig::default();
    Ok(RetrievalConfig {
        top_k: parse_env("SCRIBE_RETRIEVAL_TOP_K").unwrap_or(defaults.top_k),
        score_threshold: parse_env("SCRIBE_RETRIEVAL_SCORE_THRESHOLD")
            .unwrap_or(defaults.score_threshold),
        min_description_chars: parse_env("SCRIBE_RETRIEVAL_MIN_DESCRIPTION_CHARS")
            .unwrap_or(defaults.min_description_chars),
        embed_pacing_ms: parse_env("SCRIBE_RETRIEVAL_EMBED_PACING_MS")
            .unwrap_or(defaults.embed_pacing_ms),
        embed_timeout_secs: parse_env("SCRIBE_RETRIEVAL_EMBED_TIMEOUT_SECS")
            .unwrap_or(defaults.embed_timeout_secs)
    })
}

fn load_compression_from_env() -> Result<CompressionConfig, Box<dyn std::error::Error>> {
    let defaults = CompressionConfig::default();
    Ok(CompressionConfig {
        enabled: parse_env("SCRIBE_COMPRESSION_ENABLED").unwrap_or(defaults.enabled),
        model: env::var("SCRIBE_COMPRESSION_MODEL").unwrap_or(defaults.model),
        min_input_chars: parse_env("SCRIBE_COMPRESSION_MIN_INPUT_CHARS")
            .unwrap_or(defaults.min_input_chars)
    })
}

fn load_provider_from_env() -> Result<ProviderConfig, Box<dyn std::error::Error>> {
    let defaults = ProviderConfig::default();
    Ok(ProviderConfig {
        base_url: env::var("SCRIBE_PROVIDER_BASE_URL").unwrap_or(defaults.base_url),
        embedding_model: env::var("SCRIBE_PROVIDER_EMBEDDING_MODEL")
            .unwrap_or(defaults.embedding_model),
        api_keys: env::var("SCRIBE_PROVIDER_API_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    })
}

fn load_observability_from_env() -> Result<ObservabilityConfig, Box<dyn std::error::Error>> {
    let defaults = ObservabilityConfig::default();
    Ok(ObservabilityConfig {
        logging_level: env::var("SCRIBE_LOG_LEVEL").unwrap_or(defaults.logging_level),
        json_logs: parse_env("SCRIBE_LOG_JSON").unwrap_or(defaults.json_logs),
        metrics_enabled: parse_env("SCRIBE_METRICS_ENABLED").unwrap_or(defaults.metrics_enabled),
        metrics_port: parse_env("SCRIBE_METRICS_PORT").unwrap_or(defaults.metrics_port)
    })
}

fn parse_env<T>(key: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    match env::var(key) {
        Ok(s) => s
            .trim()
            .parse::<T>()
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
        Err(e) => Err(Box::new(e) as Box<dyn std::error::Error>)
    }
}
