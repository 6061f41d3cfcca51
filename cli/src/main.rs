use anyhow::{Result, anyhow};
use clap::Parser;
use config::ObservabilityConfig;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod engine;
mod output;
mod settings;

use commands::{Cli, Commands};
use engine::Engine;
use settings::{CliOverrides, load_settings};

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.logging_level));

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        max_concurrent: cli.command.max_concurrent()
    };
    let config = load_settings(cli.config.as_deref(), overrides)?;

    init_tracing(&config.observability);
    if config.observability.metrics_enabled {
        let endpoint = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        observability::init_metrics_exporter(endpoint)
            .map_err(|e| anyhow!("failed to start metrics exporter: {e}"))?;
    }

    let engine = Engine::build(config)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, engine, cli.config).await,
        Commands::Retrieve(args) => commands::retrieve::execute(args, engine).await,
        Commands::Compress(args) => commands::compress::execute(args, engine).await,
        Commands::Credentials(cmd) => commands::credentials::execute(cmd, engine)
    }
}
