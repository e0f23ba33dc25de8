use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use quest_graph::pack::HotReloadEvent;
use quest_graph::{spawn_dispatcher, QuestPackRegistry, ServerConfig};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("quest-graph.toml"));

    // Config errors are reported after logging is up
    let (config, config_error) = match ServerConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (ServerConfig::default(), Some(e)),
    };

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(e) = config_error {
        error!("Failed to load config, using defaults: {}", e);
    }

    // Load quest packs from TOML files
    let packs = Arc::new(QuestPackRegistry::new(&config.data_dir));
    if let Err(e) = packs.load_all() {
        error!("Failed to load quest packs: {}", e);
    }

    if config.hot_reload {
        match packs.start_file_watcher() {
            Ok(mut reloads) => {
                tokio::spawn(async move {
                    while let Some(event) = reloads.recv().await {
                        match event {
                            HotReloadEvent::Reloaded(path) => {
                                info!("Quest packs reloaded ({})", path)
                            }
                            HotReloadEvent::Error(e) => {
                                warn!("Quest pack reload failed: {}", e)
                            }
                        }
                    }
                });
            }
            Err(e) => warn!("Hot-reload disabled: {}", e),
        }
    }

    let (dispatcher, task) = spawn_dispatcher(Arc::clone(&packs), config.tick_interval());

    // Log completions
    let mut completed = dispatcher.subscribe_completed();
    tokio::spawn(async move {
        loop {
            match completed.recv().await {
                Ok(notice) => info!(
                    "Player {} completed quest '{}' at {}",
                    notice.player, notice.quest_tag, notice.completed_at
                ),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} completion notices", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for tag in packs.tags() {
        if let Err(e) = dispatcher.open_quest(&tag).await {
            error!("Failed to open quest '{}': {}", tag, e);
        }
    }

    info!("Quest graph server running with {} quests", packs.count());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    if let Err(e) = dispatcher.shutdown().await {
        warn!("Dispatcher already stopped: {}", e);
    }
    if let Err(e) = task.await {
        error!("Dispatcher task failed: {}", e);
    }
}
