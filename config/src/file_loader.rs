//! # Configuration File Loading
//!
//! Loads configuration from TOML or YAML files. The format is picked from the
//! file extension and the result is validated before it is returned.

use crate::config::Config;
use std::path::Path;
use validator::Validate;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String)
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    std::fs::read_to_string(path)
        .map_err(|_| ConfigFileError::FileNotFound(path.display().to_string()))
}

fn validated(config: Config) -> Result<Config, ConfigFileError> {
    config
        .validate()
        .map_err(|e| ConfigFileError::Invalid(e.to_string()))?;
    Ok(config)
}

/// Load configuration from a TOML file.
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_toml(Path::new("scribe.toml"))?;
///     println!("top_k: {}", config.retrieval.top_k);
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// Returns `ConfigFileError` for a missing file, invalid TOML syntax, or
/// values outside their validated ranges. Missing sections take defaults.
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = read(path)?;
    let config: Config =
        toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))?;
    validated(config)
}

/// Load configuration from a YAML file.
pub fn load_from_yaml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = read(path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigFileError::YamlParse(e.to_string()))?;
    validated(config)
}

/// Load configuration from file with auto-detection.
///
/// ## Supported Formats
/// - `.toml`: TOML format
/// - `.yaml` / `.yml`: YAML format
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat(other.to_string()))
    }
}
