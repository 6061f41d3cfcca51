use crate::engine::Engine;
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use context::CompressionOutcome;
use invocation::RecordingSink;
use std::io::Read;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct CompressArgs {
    #[arg(long, short = 'i', help = "Text file to compress; reads stdin when omitted")]
    pub input: Option<PathBuf>,

    #[arg(long, short = 'l', default_value = "en")]
    pub language: String,

    #[arg(long)]
    pub json: bool
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

pub async fn execute(args: CompressArgs, engine: Engine) -> Result<()> {
    let raw = read_input(args.input.as_ref())?;
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let compact = engine
        .compressor
        .compress(&raw, &args.language, &cancel, &sink)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&compact)?);
        return Ok(());
    }

    println!("{}", compact.text);
    let summary = format!(
        "{}: {} -> {} tokens in {} attempt(s)",
        compact.outcome,
        compact.tokens_before,
        compact.tokens_after,
        sink.attempts().len()
    );
    match compact.outcome {
        CompressionOutcome::Applied => output::success(&summary),
        CompressionOutcome::Skipped => output::info(&summary),
        CompressionOutcome::Fallback => output::warn(&summary)
    }
    Ok(())
}
