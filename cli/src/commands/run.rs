use crate::engine::Engine;
use crate::output;
use crate::settings::{CliOverrides, layer_over_file};
use anyhow::{Context, Result, anyhow};
use clap::Args;
use config::{ConfigReloadEvent, watch_config};
use scheduler::{TaskHandle, TaskScheduler};
use scribe_core::{Task, TaskEventKind, TaskSpec, TaskStatus};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    #[arg(long, short = 't', help = "JSON file holding one task spec or an array of them")]
    pub task: PathBuf,

    #[arg(long, help = "Override scheduler.max_concurrent")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Print finished tasks as JSON")]
    pub json: bool
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Many(Vec<TaskSpec>),
    One(Box<TaskSpec>)
}

impl TaskFile {
    fn into_specs(self) -> Vec<TaskSpec> {
        match self {
            TaskFile::Many(specs) => specs,
            TaskFile::One(spec) => vec![*spec]
        }
    }
}

fn read_specs(path: &Path) -> Result<Vec<TaskSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: TaskFile = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a task spec or list of task specs", path.display()))?;
    let specs = file.into_specs();
    if specs.is_empty() {
        return Err(anyhow!("{} contains no tasks", path.display()));
    }
    Ok(specs)
}

pub async fn execute(args: RunArgs, engine: Engine, config_path: Option<PathBuf>) -> Result<()> {
    let specs = read_specs(&args.task)?;
    let scheduler = engine.scheduler();

    let stream = tokio::spawn(stream_logs(scheduler.subscribe()));
    if let Some(path) = config_path {
        let overrides = CliOverrides {
            max_concurrent: args.max_concurrent
        };
        spawn_reload(path, scheduler.clone(), overrides).await;
    }
    spawn_interrupt(scheduler.clone());

    let mut handles: Vec<TaskHandle> = Vec::with_capacity(specs.len());
    for spec in specs {
        handles.push(scheduler.submit(spec).await?);
    }
    output::info(&format!("Submitted {} task(s)", handles.len()));

    let mut finished: Vec<Task> = Vec::with_capacity(handles.len());
    for handle in &mut handles {
        if let Some(task) = handle.wait().await {
            finished.push(task);
        }
    }
    stream.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        print_results(&finished);
        print_summary(&scheduler, &engine);
    }

    let failed = finished
        .iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .count();
    if failed > 0 {
        return Err(anyhow!("{failed} of {} task(s) did not complete", finished.len()));
    }
    Ok(())
}

async fn stream_logs(mut events: broadcast::Receiver<scribe_core::TaskEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let TaskEventKind::LogAppended { entry } = &event.kind {
                    output::log_line(&event.task_id, entry);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                output::warn(&format!("log stream fell behind, {skipped} event(s) skipped"));
            }
            Err(broadcast::error::RecvError::Closed) => break
        }
    }
}

async fn spawn_reload(path: PathBuf, scheduler: TaskScheduler, overrides: CliOverrides) {
    let mut rx = match watch_config(&path).await {
        Ok((_tx, rx)) => rx,
        Err(e) => {
            warn!(path = %path.display(), "Config hot reload unavailable: {e}");
            return;
        }
    };

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ConfigReloadEvent::Reloaded { config, .. } => {
                    let effective = match layer_over_file(*config, overrides.clone()) {
                        Ok(effective) => effective,
                        Err(e) => {
                            warn!("Reloaded configuration rejected: {e:#}");
                            continue;
                        }
                    };
                    let max_concurrent = effective.scheduler.max_concurrent;
                    match scheduler.configure(max_concurrent) {
                        Ok(()) => info!(max_concurrent, "Applied reloaded configuration"),
                        Err(e) => warn!("Reloaded configuration rejected: {e}")
                    }
                }
                ConfigReloadEvent::Error { error, .. } => {
                    warn!("Config reload failed, keeping previous settings: {error}");
                }
                ConfigReloadEvent::Removed(path) => {
                    warn!(path = %path.display(), "Config file removed, keeping previous settings");
                }
                ConfigReloadEvent::Ready => {}
            }
        }
    });
}

fn spawn_interrupt(scheduler: TaskScheduler) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warn("Interrupted, cancelling outstanding tasks");
            let cancelled = scheduler.cancel_all().await;
            info!(cancelled, "Cancellation requested for outstanding tasks");
        }
    });
}

fn print_results(tasks: &[Task]) {
    println!();
    output::header("Results");
    for task in tasks {
        println!(
            "\n{} {} [{}]",
            output::short_id(&task.id),
            task.kind,
            output::status(task.status)
        );
        if let Some(result) = &task.result {
            println!(
                "  model {} | {} in / {} out tokens | {} attempt(s) | {} context tokens",
                result.model,
                result.usage.input_tokens,
                result.usage.output_tokens,
                result.attempts.len(),
                result.context_tokens
            );
            println!("\n{}", result.text);
        }
        if let Some(error) = &task.error {
            println!("  {}: {}", error.kind, error.message);
        }
    }
}

fn print_summary(scheduler: &TaskScheduler, engine: &Engine) {
    let stats = scheduler.stats();
    println!();
    output::header("Summary");
    println!(
        "  completed {}  failed {}  cancelled {}",
        stats.completed, stats.failed, stats.cancelled
    );
    for summary in engine.invoker.usage().summaries() {
        println!(
            "  {}: {} ok, {} failed, {} in / {} out tokens",
            summary.model,
            summary.successful_calls,
            summary.failed_calls,
            summary.usage.input_tokens,
            summary.usage.output_tokens
        );
    }
}
