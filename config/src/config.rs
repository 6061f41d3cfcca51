//! # Configuration Structures
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization with per-field defaults
//! - Use `validator` for input validation

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Main configuration structure.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("max concurrent tasks: {}", config.scheduler.max_concurrent);
/// ```
///
/// ## Validation
/// All nested configurations must pass their own validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Task queue and admission control
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    /// Credential pool failure accounting
    #[serde(default)]
    #[validate(nested)]
    pub credentials: CredentialPoolConfig,

    /// Retry, backoff and model fallback
    #[serde(default)]
    #[validate(nested)]
    pub invocation: InvocationConfig,

    /// Semantic top-K retrieval
    #[serde(default)]
    #[validate(nested)]
    pub retrieval: RetrievalConfig,

    /// Structured fact extraction
    #[serde(default)]
    #[validate(nested)]
    pub compression: CompressionConfig,

    /// Model endpoint connection
    #[serde(default)]
    #[validate(nested)]
    pub provider: ProviderConfig,

    /// Logging and metrics
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

/// Scheduler configuration.
///
/// ## Fields
/// - `max_concurrent`: Tasks allowed in `running` at once (default: 2)
/// - `event_capacity`: Buffered task events per subscriber (default: 1024)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent: usize,

    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 16, max = 65536))]
    pub event_capacity: usize
}

fn default_max_concurrent() -> usize {
    2
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            event_capacity: default_event_capacity()
        }
    }
}

/// Credential pool configuration.
///
/// ## Fields
/// - `failure_threshold`: Consecutive failures that deactivate a credential
///   (default: 3)
/// - `reactivate_after_secs`: Cooldown after which an automatically
///   deactivated credential is eligible again (default: disabled)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CredentialPoolConfig {
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1, max = 100))]
    pub failure_threshold: u32,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub reactivate_after_secs: Option<u64>
}

fn default_failure_threshold() -> u32 {
    3
}

impl CredentialPoolConfig {
    pub fn reactivate_after(&self) -> Option<Duration> {
        self.reactivate_after_secs.map(Duration::from_secs)
    }
}

impl Default for CredentialPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reactivate_after_secs: None
        }
    }
}

/// Resilient invocation configuration.
///
/// ## Fields
/// - `max_attempts`: Retry ceiling for the primary model (default: 3)
/// - `base_delay_ms`: Backoff before the second attempt (default: 3000)
/// - `max_delay_ms`: Upper bound of any single backoff (default: 60000)
/// - `rate_limit_multiplier`: Extra factor for quota errors (default: 3.0)
/// - `network_multiplier`: Extra factor for network errors (default: 1.5)
/// - `jitter_ms`: Upper bound of the random addend (default: 1000)
/// - `call_timeout_secs`: Per provider call timeout (default: 120)
/// - `default_model` / `fallback_model`: Models used when a task names none
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_delay_bounds"))]
pub struct InvocationConfig {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    #[validate(range(min = 1, max = 600000))]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1, max = 3600000))]
    pub max_delay_ms: u64,

    #[serde(default = "default_rate_limit_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub rate_limit_multiplier: f64,

    #[serde(default = "default_network_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub network_multiplier: f64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_call_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub call_timeout_secs: u64,

    #[serde(default = "default_model")]
    #[validate(length(min = 1, max = 255))]
    pub default_model: String,

    #[serde(default)]
    pub fallback_model: Option<String>
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    3000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_rate_limit_multiplier() -> f64 {
    3.0
}

fn default_network_multiplier() -> f64 {
    1.5
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn validate_delay_bounds(config: &InvocationConfig) -> Result<(), ValidationError> {
    if config.max_delay_ms < config.base_delay_ms {
        return Err(ValidationError::new("max_delay_ms must be >= base_delay_ms"));
    }
    Ok(())
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            network_multiplier: default_network_multiplier(),
            jitter_ms: default_jitter_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            default_model: default_model(),
            fallback_model: None
        }
    }
}

/// Retrieval configuration.
///
/// ## Fields
/// - `top_k`: Maximum nodes returned (default: 10)
/// - `score_threshold`: Minimum cosine similarity, exclusive (default: 0.4)
/// - `min_description_chars`: Shorter descriptions are skipped (default: 10)
/// - `embed_pacing_ms`: Pause between embedding calls (default: 200)
/// - `embed_timeout_secs`: Upper bound on one embedding call (default: 30)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 1000))]
    pub top_k: usize,

    #[serde(default = "default_score_threshold")]
    #[validate(range(min = -1.0, max = 1.0))]
    pub score_threshold: f32,

    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,

    #[serde(default = "default_embed_pacing_ms")]
    pub embed_pacing_ms: u64,

    #[serde(default = "default_embed_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub embed_timeout_secs: u64
}

fn default_top_k() -> usize {
    10
}

fn default_score_threshold() -> f32 {
    0.4
}

fn default_min_description_chars() -> usize {
    10
}

fn default_embed_pacing_ms() -> u64 {
    200
}

fn default_embed_timeout_secs() -> u64 {
    30
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            min_description_chars: default_min_description_chars(),
            embed_pacing_ms: default_embed_pacing_ms(),
            embed_timeout_secs: default_embed_timeout_secs()
        }
    }
}

/// Compression configuration.
///
/// ## Fields
/// - `enabled`: Allow tasks to request compression (default: true)
/// - `model`: Lighter-weight model used for fact extraction
/// - `min_input_chars`: Shorter inputs are passed through (default: 400)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CompressionConfig {
    #[serde(default = "default_compression_enabled")]
    pub enabled: bool,

    #[serde(default = "default_compression_model")]
    #[validate(length(min = 1, max = 255))]
    pub model: String,

    #[serde(default = "default_min_input_chars")]
    pub min_input_chars: usize
}

fn default_compression_enabled() -> bool {
    true
}

fn default_compression_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_min_input_chars() -> usize {
    400
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_compression_enabled(),
            model: default_compression_model(),
            min_input_chars: default_min_input_chars()
        }
    }
}

/// Model endpoint configuration.
///
/// ## Fields
/// - `base_url`: OpenAI-compatible API root (default: OpenAI)
/// - `embedding_model`: Model used for context embeddings
/// - `api_keys`: Credentials loaded into the pool, as `id=secret` or bare
///   secrets (ids are then assigned as `key-N`)
#[derive(Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    #[validate(length(min = 1, max = 255))]
    pub embedding_model: String,

    #[serde(default)]
    pub api_keys: Vec<String>
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl ProviderConfig {
    /// Splits `api_keys` into `(id, secret)` pairs.
    pub fn credentials(&self) -> Vec<(String, String)> {
        self.api_keys
            .iter()
            .enumerate()
            .filter(|(_, raw)| !raw.trim().is_empty())
            .map(|(i, raw)| match raw.split_once('=') {
                Some((id, secret)) if !id.is_empty() => {
                    (id.trim().to_string(), secret.trim().to_string())
                }
                _ => (format!("key-{}", i + 1), raw.trim().to_string())
            })
            .collect()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("api_keys", &format!("<{} redacted>", self.api_keys.len()))
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            api_keys: Vec::new()
        }
    }
}

/// Observability configuration.
///
/// ## Fields
/// - `logging_level`: Log level (default: "info")
/// - `json_logs`: Emit JSON formatted logs (default: false)
/// - `metrics_enabled`: Install the Prometheus exporter (default: false)
/// - `metrics_port`: Metrics server port (default: 9090)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    #[validate(range(min = 1, max = 65535))]
    pub metrics_port: u16
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn validate_logging_level(value: &str) -> Result<(), ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("Invalid logging level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging_level: default_logging_level(),
            json_logs: false,
            metrics_enabled: false,
            metrics_port: default_metrics_port()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.invocation.max_attempts, 3);
        assert_eq!(config.invocation.base_delay_ms, 3000);
        assert_eq!(config.credentials.failure_threshold, 3);
        assert_eq!(config.retrieval.top_k, 10);
        assert!((config.retrieval.score_threshold - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.scheduler.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_bounds_rejected() {
        let mut config = Config::default();
        config.invocation.base_delay_ms = 5000;
        config.invocation.max_delay_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_logging_level_rejected() {
        let mut config = Config::default();
        config.observability.logging_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_credentials_parsing() {
        let provider = ProviderConfig {
            api_keys: vec![
                "primary=sk-one".to_string(),
                "sk-two".to_string(),
                "  ".to_string(),
            ],
            ..Default::default()
        };
        let creds = provider.credentials();
        assert_eq!(
            creds,
            vec![
                ("primary".to_string(), "sk-one".to_string()),
                ("key-2".to_string(), "sk-two".to_string()),
            ]
        );
        assert!(!format!("{provider:?}").contains("sk-one"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[scheduler]\nmax_concurrent = 5\n").unwrap();
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.scheduler.event_capacity, 1024);
        assert_eq!(config.invocation, InvocationConfig::default());
    }
}
