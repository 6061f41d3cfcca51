use crate::engine::Engine;
use crate::output;
use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand)]
pub enum CredentialsCommand {
    #[command(about = "Show configured credentials and their health")]
    List {
        #[arg(long)]
        json: bool
    }
}

pub fn execute(cmd: CredentialsCommand, engine: Engine) -> Result<()> {
    match cmd {
        CredentialsCommand::List { json } => list(&engine, json)
    }
}

fn list(engine: &Engine, json: bool) -> Result<()> {
    let credentials = engine.credentials.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&credentials)?);
        return Ok(());
    }

    output::header("Credentials");
    if credentials.is_empty() {
        output::warn("none configured");
        return Ok(());
    }
    println!(
        "{:<16} {:<10} {:>8} {:>10}",
        "ID", "STATE", "USES", "FAILURES"
    );
    for credential in &credentials {
        let state = if credential.active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!(
            "{:<16} {:<10} {:>8} {:>10}",
            credential.id.as_str(),
            state,
            credential.usage_count,
            credential.total_failures
        );
    }
    println!(
        "\n{} of {} active",
        engine.credentials.active_count(),
        credentials.len()
    );
    Ok(())
}
