use crate::engine::Engine;
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use context::RetrievalOptions;
use scribe_core::ContextNode;
use serde::Deserialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct RetrieveArgs {
    #[arg(long, short = 'n', help = "JSON file holding a context node tree or a list of trees")]
    pub nodes: PathBuf,

    #[arg(long, short = 'q')]
    pub query: String,

    #[arg(long, help = "Override retrieval.top_k")]
    pub top_k: Option<usize>,

    #[arg(long, help = "Override retrieval.score_threshold (exclusive)")]
    pub threshold: Option<f32>,

    #[arg(long, help = "Write computed embeddings back into the nodes file")]
    pub write: bool,

    #[arg(long)]
    pub json: bool
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeFile {
    Many(Vec<ContextNode>),
    One(Box<ContextNode>)
}

pub async fn execute(args: RetrieveArgs, engine: Engine) -> Result<()> {
    let raw = std::fs::read_to_string(&args.nodes)
        .with_context(|| format!("failed to read {}", args.nodes.display()))?;
    let mut nodes = match serde_json::from_str::<NodeFile>(&raw)
        .with_context(|| format!("{} is not a context node tree", args.nodes.display()))?
    {
        NodeFile::Many(nodes) => nodes,
        NodeFile::One(node) => vec![*node]
    };

    let mut options = RetrievalOptions::from(&engine.config.retrieval);
    if let Some(top_k) = args.top_k {
        options.top_k = top_k;
    }
    if let Some(threshold) = args.threshold {
        options.score_threshold = threshold;
    }

    let cancel = CancellationToken::new();
    let ranked = engine
        .retriever
        .retrieve(&args.query, &mut nodes, options, &cancel)
        .await?;

    if args.write && ranked.embedded > 0 {
        std::fs::write(&args.nodes, serde_json::to_string_pretty(&nodes)?)
            .with_context(|| format!("failed to write {}", args.nodes.display()))?;
        output::info(&format!(
            "Cached {} new embedding(s) in {}",
            ranked.embedded,
            args.nodes.display()
        ));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    output::header(&format!("Top {} for \"{}\"", options.top_k, args.query));
    if ranked.is_empty() {
        output::warn(&format!(
            "No node scored above {} ({} candidate(s))",
            options.score_threshold, ranked.candidates
        ));
        return Ok(());
    }
    for (rank, entry) in ranked.entries.iter().enumerate() {
        println!(
            "{:>2}. {:.3}  {} ({})",
            rank + 1,
            entry.score,
            entry.name,
            entry.node_id
        );
        println!("      {}", entry.description);
    }
    output::success(&format!(
        "{} of {} candidate(s), {} embedded this run",
        ranked.len(),
        ranked.candidates,
        ranked.embedded
    ));
    Ok(())
}
