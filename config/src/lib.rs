//! # Configuration System
//!
//! Centralized configuration for the orchestration engine.
//!
//! This crate provides:
//! - Configuration structures for every subsystem (scheduler, credential
//!   pool, invocation, retrieval, compression, provider, observability)
//! - Environment variable loading (`SCRIBE_*`)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (CLI > env > file > defaults)
//! - Validation through the `validator` crate
//! - Hot reload of the configuration file

pub mod config;
pub mod file_loader;
pub mod hot_reload;
pub mod loader;
pub mod precedence;

pub use config::{
    CompressionConfig, Config, CredentialPoolConfig, InvocationConfig, ObservabilityConfig,
    ProviderConfig, RetrievalConfig, SchedulerConfig,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use hot_reload::{ConfigReloadEvent, watch_config};
pub use loader::load_from_env;
pub use precedence::merge_configs;
pub use validator::Validate;
