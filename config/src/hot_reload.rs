//! # Configuration Hot Reload
//!
//! Watches a configuration file and emits the re-parsed, validated
//! configuration whenever it changes. Consumers decide which settings they
//! can apply live; the scheduler applies `scheduler.max_concurrent`.

use crate::config::Config;
use crate::file_loader::load_from_file;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration reload event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReloadEvent {
    /// Watcher is installed
    Ready,

    /// File changed and parsed into a valid configuration
    Reloaded { path: PathBuf, config: Box<Config> },

    /// Configuration file was removed
    Removed(PathBuf),

    /// File changed but could not be loaded; the previous configuration
    /// stays in effect
    Error { path: PathBuf, error: String }
}

/// Watch a configuration file for changes and emit reload events.
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust,no_run
/// use config::{ConfigReloadEvent, watch_config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (_tx, mut rx) = watch_config(std::path::Path::new("scribe.toml")).await?;
///
///     while let Some(event) = rx.recv().await {
///         if let ConfigReloadEvent::Reloaded { config, .. } = event {
///             println!("max_concurrent = {}", config.scheduler.max_concurrent);
///         }
///     }
///     Ok(())
/// }
/// ```
///
/// ## Lifecycle
/// The watcher task stops once every receiver is dropped.
pub async fn watch_config(
    config_path: &Path
) -> Result<
    (
        mpsc::Sender<ConfigReloadEvent>,
        mpsc::Receiver<ConfigReloadEvent>
    ),
    Box<dyn std::error::Error>
> {
    let config_path = config_path.to_path_buf();

    if !config_path.exists() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Config file not found: {:?}", config_path)
        )));
    }

    let (tx, rx) = mpsc::channel(100);
    let tx_task = tx.clone();

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::channel(100);
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default()
        );
        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                let error = format!("Failed to create file watcher: {}", e);
                error!("{}", error);
                let _ = tx_task
                    .send(ConfigReloadEvent::Error {
                        path: config_path,
                        error
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
            let error = format!("Failed to watch config file: {}", e);
            error!("{}", error);
            let _ = tx_task
                .send(ConfigReloadEvent::Error {
                    path: config_path,
                    error
                })
                .await;
            return;
        }

        info!("Watching config file: {:?}", config_path);
        let _ = tx_task.send(ConfigReloadEvent::Ready).await;

        loop {
            tokio::select! {
                _ = tx_task.closed() => {
                    debug!("Receiver dropped, stopping watcher for {:?}", config_path);
                    break;
                }
                event_result = event_rx.recv() => {
                    let Some(event_result) = event_result else {
                        break;
                    };
                    let event = match event_result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Watch error: {}", e);
                            continue;
                        }
                    };

                    let reload_event = match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => reload(&config_path),
                        EventKind::Remove(_) => {
                            warn!("Config file removed: {:?}", config_path);
                            ConfigReloadEvent::Removed(config_path.clone())
                        }
                        other => {
                            debug!("Ignoring event: {:?}", other);
                            continue;
                        }
                    };

                    if let Err(e) = tx_task.send(reload_event).await {
                        error!("Failed to send config reload event: {}", e);
                        break;
                    }
                }
            }
        }
    });

    Ok((tx, rx))
}

fn reload(path: &Path) -> ConfigReloadEvent {
    match load_from_file(path) {
        Ok(config) => {
            info!("Config file reloaded: {:?}", path);
            ConfigReloadEvent::Reloaded {
                path: path.to_path_buf(),
                config: Box::new(config)
            }
        }
        Err(e) => {
            warn!("Config file change rejected: {}", e);
            ConfigReloadEvent::Error {
                path: path.to_path_buf(),
                error: e.to_string()
            }
        }
    }
}
