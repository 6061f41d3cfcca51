//! # Configuration Precedence
//!
//! Merges configuration from multiple sources with precedence rules.
//!
//! # Precedence Order
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values (lowest priority)

use crate::config::{
    CompressionConfig, Config, CredentialPoolConfig, InvocationConfig, ObservabilityConfig,
    ProviderConfig, RetrievalConfig, SchedulerConfig
};

/// Merge multiple configuration sources with precedence.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Merges configuration from multiple sources following precedence rules:
/// CLI arguments > environment variables > config file > defaults.
///
/// ## Usage
/// ```rust,no_run
/// use config::{Config, load_from_env, load_from_file, merge_configs};
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let from_file = load_from_file(Path::new("scribe.toml"))?;
///     let from_env = load_from_env()?;
///
///     let _config = merge_configs(
///         Config::default(),
///         from_file,
///         "file",
///         from_env,
///         "env",
///         None,
///         "cli"
///     );
///     Ok(())
/// }
/// ```
///
/// ## Field Semantics
/// A layer only overrides a field whose value differs from the built-in
/// default, so a source that leaves a field unset never clobbers a lower
/// layer. Lists are replaced, not concatenated.
pub fn merge_configs(
    defaults: Config,
    file_config: Config,
    file_source_name: &str,
    env_config: Config,
    env_source_name: &str,
    cli_config: Option<Config>,
    cli_source_name: &str
) -> Config {
    let mut config = defaults;

    config = merge_with_logging(config, file_config, file_source_name);
    config = merge_with_logging(config, env_config, env_source_name);

    if let Some(cli) = cli_config {
        config = merge_with_logging(config, cli, cli_source_name);
    }

    config
}

fn merge_with_logging(mut base: Config, override_config: Config, source_name: &str) -> Config {
    let mut changes = Vec::new();

    merge_scheduler(&mut base.scheduler, &override_config.scheduler, &mut changes);
    merge_credentials(
        &mut base.credentials,
        &override_config.credentials,
        &mut changes
    );
    merge_invocation(&mut base.invocation, &override_config.invocation, &mut changes);
    merge_retrieval(&mut base.retrieval, &override_config.retrieval, &mut changes);
    merge_compression(
        &mut base.compression,
        &override_config.compression,
        &mut changes
    );
    merge_provider(&mut base.provider, &override_config.provider, &mut changes);
    merge_observability(
        &mut base.observability,
        &override_config.observability,
        &mut changes
    );

    if !changes.is_empty() {
        tracing::info!("Configuration from {}: {:?}", source_name, changes);
    }

    base
}

fn take<T: PartialEq + Clone>(
    base: &mut T,
    candidate: &T,
    default: &T,
    name: &str,
    changes: &mut Vec<String>
) {
    if candidate != default && candidate != base {
        *base = candidate.clone();
        changes.push(name.to_string());
    }
}

fn merge_scheduler(
    base: &mut SchedulerConfig,
    override_config: &SchedulerConfig,
    changes: &mut Vec<String>
) {
    let default = SchedulerConfig::default();
    take(
        &mut base.max_concurrent,
        &override_config.max_concurrent,
        &default.max_concurrent,
        "scheduler.max_concurrent",
        changes
    );
    take(
        &mut base.event_capacity,
        &override_config.event_capacity,
        &default.event_capacity,
        "scheduler.event_capacity",
        changes
    );
}

fn merge_credentials(
    base: &mut CredentialPoolConfig,
    override_config: &CredentialPoolConfig,
    changes: &mut Vec<String>
) {
    let default = CredentialPoolConfig::default();
    take(
        &mut base.failure_threshold,
        &override_config.failure_threshold,
        &default.failure_threshold,
        "credentials.failure_threshold",
        changes
    );
    take(
        &mut base.reactivate_after_secs,
        &override_config.reactivate_after_secs,
        &default.reactivate_after_secs,
        "credentials.reactivate_after_secs",
        changes
    );
}

fn merge_invocation(
    base: &mut InvocationConfig,
    override_config: &InvocationConfig,
    changes: &mut Vec<String>
) {
    let default = InvocationConfig::default();
    take(
        &mut base.max_attempts,
        &override_config.max_attempts,
        &default.max_attempts,
        "invocation.max_attempts",
        changes
    );
    take(
        &mut base.base_delay_ms,
        &override_config.base_delay_ms,
        &default.base_delay_ms,
        "invocation.base_delay_ms",
        changes
    );
    take(
        &mut base.max_delay_ms,
        &override_config.max_delay_ms,
        &default.max_delay_ms,
        "invocation.max_delay_ms",
        changes
    );
    take(
        &mut base.rate_limit_multiplier,
        &override_config.rate_limit_multiplier,
        &default.rate_limit_multiplier,
        "invocation.rate_limit_multiplier",
        changes
    );
    take(
        &mut base.network_multiplier,
        &override_config.network_multiplier,
        &default.network_multiplier,
        "invocation.network_multiplier",
        changes
    );
    take(
        &mut base.jitter_ms,
        &override_config.jitter_ms,
        &default.jitter_ms,
        "invocation.jitter_ms",
        changes
    );
    take(
        &mut base.call_timeout_secs,
        &override_config.call_timeout_secs,
        &default.call_timeout_secs,
        "invocation.call_timeout_secs",
        changes
    );
    take(
        &mut base.default_model,
        &override_config.default_model,
        &default.default_model,
        "invocation.default_model",
        changes
    );
    take(
        &mut base.fallback_model,
        &override_config.fallback_model,
        &default.fallback_model,
        "invocation.fallback_model",
        changes
    );
}

fn merge_retrieval(
    base: &mut RetrievalConfig,
    override_config: &RetrievalConfig,
    changes: &mut Vec<String>
) {
    let default = RetrievalConfig::default();
    take(
        &mut base.top_k,
        &override_config.top_k,
        &default.top_k,
        "retrieval.top_k",
        changes
    );
    take(
        &mut base.score_threshold,
        &override_config.score_threshold,
        &default.score_threshold,
        "retrieval.score_threshold",
        changes
    );
    take(
        &mut base.min_description_chars,
        &override_config.min_description_chars,
        &default.min_description_chars,
        "retrieval.min_description_chars",
        changes
    );
    take(
        &mut base.embed_pacing_ms,
        &override_config.embed_pacing_ms,
        &default.embed_pacing_ms,
        "retrieval.embed_pacing_ms",
        changes
    );
    take(
        &mut base.embed_timeout_secs,
        &override_config.embed_timeout_secs,
        &default.embed_timeout_secs,
        "retrieval.embed_timeout_secs",
        changes
    );
}

fn merge_compression(
    base: &mut CompressionConfig,
    override_config: &CompressionConfig,
    changes: &mut Vec<String>
) {
    let default = CompressionConfig::default();
    take(
        &mut base.enabled,
        &override_config.enabled,
        &default.enabled,
        "compression.enabled",
        changes
    );
    take(
        &mut base.model,
        &override_config.model,
        &default.model,
        "compression.model",
        changes
    );
    take(
        &mut base.min_input_chars,
        &override_config.min_input_chars,
        &default.min_input_chars,
        "compression.min_input_chars",
        changes
    );
}

fn merge_provider(
    base: &mut ProviderConfig,
    override_config: &ProviderConfig,
    changes: &mut Vec<String>
) {
    let default = ProviderConfig::default();
    take(
        &mut base.base_url,
        &override_config.base_url,
        &default.base_url,
        "provider.base_url",
        changes
    );
    take(
        &mut base.embedding_model,
        &override_config.embedding_model,
        &default.embedding_model,
        "provider.embedding_model",
        changes
    );
    // Secrets are never logged, only the fact that keys changed.
    take(
        &mut base.api_keys,
        &override_config.api_keys,
        &default.api_keys,
        "provider.api_keys",
        changes
    );
}

fn merge_observability(
    base: &mut ObservabilityConfig,
    override_config: &ObservabilityConfig,
    changes: &mut Vec<String>
) {
    let default = ObservabilityConfig::default();
    take(
        &mut base.logging_level,
        &override_config.logging_level,
        &default.logging_level,
        "observability.logging_level",
        changes
    );
    take(
        &mut base.json_logs,
        &override_config.json_logs,
        &default.json_logs,
        "observability.json_logs",
        changes
    );
    take(
        &mut base.metrics_enabled,
        &override_config.metrics_enabled,
        &default.metrics_enabled,
        "observability.metrics_enabled",
        changes
    );
    take(
        &mut base.metrics_port,
        &override_config.metrics_port,
        &default.metrics_port,
        "observability.metrics_port",
        changes
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_configs_precedence() {
        let mut file_config = Config::default();
        file_config.scheduler.max_concurrent = 4;
        file_config.retrieval.top_k = 5;

        let mut env_config = Config::default();
        env_config.scheduler.max_concurrent = 8;

        let merged = merge_configs(
            Config::default(),
            file_config,
            "file",
            env_config,
            "env",
            None,
            "cli"
        );

        assert_eq!(merged.scheduler.max_concurrent, 8);
        assert_eq!(merged.retrieval.top_k, 5);
    }

    #[test]
    fn test_unset_layer_does_not_clobber() {
        let mut file_config = Config::default();
        file_config.invocation.fallback_model = Some("gpt-4o-mini".to_string());
        file_config.provider.api_keys = vec!["a=sk-a".to_string()];

        let merged = merge_configs(
            Config::default(),
            file_config,
            "file",
            Config::default(),
            "env",
            None,
            "cli"
        );

        assert_eq!(
            merged.invocation.fallback_model.as_deref(),
            Some("gpt-4o-mini")
        );
        assert_eq!(merged.provider.api_keys, vec!["a=sk-a"]);
    }

    #[test]
    fn test_merge_cli_overrides_all() {
        let mut file_config = Config::default();
        file_config.observability.logging_level = "warn".to_string();
        let mut env_config = Config::default();
        env_config.observability.logging_level = "debug".to_string();
        let mut cli_config = Config::default();
        cli_config.observability.logging_level = "trace".to_string();
        cli_config.credentials.failure_threshold = 7;

        let merged = merge_configs(
            Config::default(),
            file_config,
            "file",
            env_config,
            "env",
            Some(cli_config),
            "cli"
        );

        assert_eq!(merged.observability.logging_level, "trace");
        assert_eq!(merged.credentials.failure_threshold, 7);
    }

    #[test]
    fn test_change_log_names_fields() {
        let mut base = Config::default().invocation;
        let mut candidate = InvocationConfig::default();
        candidate.max_attempts = 6;
        candidate.jitter_ms = 0;

        let mut changes = Vec::new();
        merge_invocation(&mut base, &candidate, &mut changes);

        assert_eq!(base.max_attempts, 6);
        assert_eq!(base.jitter_ms, 0);
        assert_eq!(
            changes,
            vec!["invocation.max_attempts", "invocation.jitter_ms"]
        );
    }
}
