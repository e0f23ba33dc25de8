//! Server Configuration
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file still yields a usable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Quest packs live under `<data_dir>/quests`
    pub data_dir: PathBuf,
    /// How often queued re-evaluations are drained
    pub tick_interval_ms: u64,
    /// Watch the pack directory and reload on change
    pub hot_reload: bool,
    /// Used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tick_interval_ms: 50, // 20 Hz
            hot_reload: false,
            log_filter: "quest_graph=info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        Self::from_toml(&content).map_err(|e| format!("Failed to parse {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        let config: ServerConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        if config.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than zero".to_string());
        }
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
