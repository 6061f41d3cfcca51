pub mod compress;
pub mod credentials;
pub mod retrieve;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scribe",
    author,
    version,
    about = "Scribe - AI task orchestration for long-form writing",
    long_about = "Runs generation tasks with bounded concurrency, credential rotation, retry \
                  with backoff, model fallback and context retrieval/compression.\n\nSettings \
                  come from defaults, an optional config file, SCRIBE_* variables and flags, \
                  in that order."
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "SCRIBE_CONFIG",
        help = "Config file (.toml, .yaml, .yml)"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Submit tasks from a JSON file and stream their logs")]
    Run(run::RunArgs),

    #[command(about = "Rank context nodes against a query")]
    Retrieve(retrieve::RetrieveArgs),

    #[command(about = "Compress free text into entities and facts")]
    Compress(compress::CompressArgs),

    #[command(subcommand, about = "Inspect the credential pool")]
    Credentials(credentials::CredentialsCommand)
}

impl Commands {
    /// `--max-concurrent` given to `run`, if any.
    pub fn max_concurrent(&self) -> Option<usize> {
        match self {
            Commands::Run(args) => args.max_concurrent,
            _ => None
        }
    }
}
