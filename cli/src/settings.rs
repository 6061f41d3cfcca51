use anyhow::{Context, Result, anyhow};
use config::{Config, Validate, load_from_env, load_from_file, merge_configs};
use std::path::Path;

/// Values set directly on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_concurrent: Option<usize>
}

impl CliOverrides {
    fn into_config(self) -> Option<Config> {
        let max_concurrent = self.max_concurrent?;
        let mut config = Config::default();
        config.scheduler.max_concurrent = max_concurrent;
        Some(config)
    }
}

/// Resolves the effective configuration: defaults < file < env < CLI.
pub fn load_settings(path: Option<&Path>, overrides: CliOverrides) -> Result<Config> {
    let file_config = match path {
        Some(path) => load_from_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => Config::default()
    };
    layer_over_file(file_config, overrides)
}

/// Re-applies env and CLI values over a freshly loaded file, so a hot
/// reload never undoes a higher-precedence setting.
pub fn layer_over_file(file_config: Config, overrides: CliOverrides) -> Result<Config> {
    let env_config = load_from_env().map_err(|e| anyhow!("invalid SCRIBE_* environment: {e}"))?;

    let config = merge_configs(
        Config::default(),
        file_config,
        "file",
        env_config,
        "env",
        overrides.into_config(),
        "cli"
    );
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}
