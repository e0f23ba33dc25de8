//! Quest Pack Registry
//!
//! Loads, caches, and serves quest packs from TOML files, and hands their
//! nodes to quest graphs. Supports hot-reloading during development.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::definition::{QuestPack, RawQuestPackFile};
use super::objective::ObjectiveNode;
use crate::quest::{NodeId, NodeLoader, QuestNode};

/// Registry for all quest packs
pub struct QuestPackRegistry {
    /// Loaded packs by quest tag
    packs: RwLock<HashMap<String, Arc<QuestPack>>>,
    /// Base directory for quest packs
    data_dir: PathBuf,
}

impl QuestPackRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            packs: RwLock::new(HashMap::new()),
            data_dir: data_dir.join("quests"),
        }
    }

    pub fn quest_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load every pack under the quest directory, replacing what was loaded
    /// before. Returns the number of packs loaded.
    pub fn load_all(&self) -> Result<usize, String> {
        info!("Loading quest packs from {:?}", self.data_dir);

        if !self.data_dir.exists() {
            warn!("Quest directory does not exist: {:?}", self.data_dir);
            return Ok(0);
        }

        let mut paths = Vec::new();
        Self::collect_pack_paths(&self.data_dir, &mut paths)?;
        paths.sort();

        let mut loaded: HashMap<String, Arc<QuestPack>> = HashMap::new();
        for path in paths {
            match Self::load_pack_file(&path) {
                Ok(pack) => {
                    if loaded.contains_key(&pack.tag) {
                        warn!("Duplicate quest tag '{}' in {:?}, skipping", pack.tag, path);
                        continue;
                    }
                    info!("Loaded quest pack: {} ({})", pack.name, pack.tag);
                    loaded.insert(pack.tag.clone(), Arc::new(pack));
                }
                Err(e) => warn!("Failed to load quest pack {:?}: {}", path, e),
            }
        }

        let count = loaded.len();
        *self.packs.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        info!("Loaded {} quest packs", count);
        Ok(count)
    }

    fn collect_pack_paths(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("Failed to read directory {:?}: {}", dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
            let path = entry.path();

            if path.is_dir() {
                Self::collect_pack_paths(&path, paths)?;
            } else if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }

        Ok(())
    }

    fn load_pack_file(path: &Path) -> Result<QuestPack, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

        let raw: RawQuestPackFile = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;

        QuestPack::from_raw(&raw.quest)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<QuestPack>>> {
        self.packs.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a pack by quest tag
    pub fn get(&self, quest_tag: &str) -> Option<Arc<QuestPack>> {
        self.read().get(quest_tag).cloned()
    }

    /// All loaded quest tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Start file watcher for hot-reload.
    /// Returns a channel receiver that signals when reloads occur
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> Result<mpsc::UnboundedReceiver<HotReloadEvent>, String> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        if !self.data_dir.exists() {
            return Err(format!("Quest directory does not exist: {:?}", self.data_dir));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(|e| format!("Failed to create file watcher: {}", e))?;

        watcher
            .watch(&self.data_dir, RecursiveMode::Recursive)
            .map_err(|e| format!("Failed to watch quest directory: {}", e))?;

        info!("Quest hot-reload watcher started for {:?}", self.data_dir);

        let registry = Arc::clone(self);
        std::thread::spawn(move || {
            // The watcher stops when dropped
            let _watcher = watcher;

            while let Ok(event) = notify_rx.recv() {
                if !matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    continue;
                }

                let Some(path) = event
                    .paths
                    .iter()
                    .find(|path| path.extension().is_some_and(|ext| ext == "toml"))
                else {
                    continue;
                };

                info!("Detected change in {:?}, reloading quest packs", path);
                let message = match registry.load_all() {
                    Ok(count) => {
                        info!("Hot-reload completed: {} quest packs", count);
                        HotReloadEvent::Reloaded(path.to_string_lossy().to_string())
                    }
                    Err(e) => {
                        error!("Hot-reload failed: {}", e);
                        HotReloadEvent::Error(e)
                    }
                };

                if tx.send(message).is_err() {
                    debug!("Hot-reload listener gone, stopping watcher");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

impl NodeLoader for QuestPackRegistry {
    fn load_node(&self, quest_tag: &str, node_id: NodeId) -> Option<Box<dyn QuestNode>> {
        let pack = self.get(quest_tag)?;
        let definition = pack.node(node_id)?.clone();
        Some(Box::new(ObjectiveNode::new(quest_tag, definition)))
    }
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotReloadEvent {
    /// Packs were reloaded after a change to this file
    Reloaded(String),
    /// An error occurred during reload
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_pack_toml(tag: &str) -> String {
        format!(
            r#"
[quest]
tag = "{tag}"
name = "Test Quest"

[[quest.nodes]]
id = 0
root = true
next = 1

[[quest.nodes]]
id = 1
next = -2
[quest.nodes.objective]
type = "kill_monster"
target = "slime"
count = 3
"#
        )
    }

    fn quest_dir(temp_dir: &TempDir) -> PathBuf {
        let quest_dir = temp_dir.path().join("quests");
        std::fs::create_dir_all(quest_dir.join("chapter_one")).unwrap();
        quest_dir
    }

    #[test]
    fn test_load_packs() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = quest_dir(&temp_dir);

        std::fs::write(quest_dir.join("test.toml"), create_test_pack_toml("test_quest")).unwrap();
        std::fs::write(
            quest_dir.join("chapter_one").join("nested.toml"),
            create_test_pack_toml("nested_quest"),
        )
        .unwrap();
        std::fs::write(quest_dir.join("broken.toml"), "[quest]\ntag = ").unwrap();
        std::fs::write(quest_dir.join("notes.txt"), "not a pack").unwrap();

        let registry = QuestPackRegistry::new(temp_dir.path());
        assert_eq!(registry.load_all().unwrap(), 2);
        assert_eq!(registry.tags(), vec!["nested_quest", "test_quest"]);

        let pack = registry.get("test_quest").unwrap();
        assert_eq!(pack.name, "Test Quest");
        assert_eq!(pack.node_count(), 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = QuestPackRegistry::new(temp_dir.path());
        assert_eq!(registry.load_all().unwrap(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_reload_replaces_packs() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = quest_dir(&temp_dir);
        let path = quest_dir.join("test.toml");

        std::fs::write(&path, create_test_pack_toml("old_tag")).unwrap();
        let registry = QuestPackRegistry::new(temp_dir.path());
        registry.load_all().unwrap();
        assert!(registry.get("old_tag").is_some());

        std::fs::write(&path, create_test_pack_toml("new_tag")).unwrap();
        registry.load_all().unwrap();
        assert!(registry.get("old_tag").is_none());
        assert!(registry.get("new_tag").is_some());
    }

    #[test]
    fn test_loader_builds_objective_nodes() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = quest_dir(&temp_dir);
        std::fs::write(quest_dir.join("test.toml"), create_test_pack_toml("test_quest")).unwrap();

        let registry = QuestPackRegistry::new(temp_dir.path());
        registry.load_all().unwrap();

        let root = registry.load_node("test_quest", 0).unwrap();
        assert_eq!(root.id(), 0);
        assert!(root.is_root());

        let hunt = registry.load_node("test_quest", 1).unwrap();
        assert!(!hunt.is_root());

        assert!(registry.load_node("test_quest", 7).is_none());
        assert!(registry.load_node("other_quest", 0).is_none());
    }

    #[test]
    fn test_file_watcher_needs_quest_directory() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(QuestPackRegistry::new(temp_dir.path()));
        assert!(registry.start_file_watcher().is_err());
    }

    #[tokio::test]
    async fn test_file_watcher_reloads_edited_pack() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = quest_dir(&temp_dir);
        let pack_path = quest_dir.join("test.toml");
        std::fs::write(&pack_path, create_test_pack_toml("test_quest")).unwrap();

        let registry = Arc::new(QuestPackRegistry::new(temp_dir.path()));
        assert_eq!(registry.load_all().unwrap(), 1);
        let mut reloads = registry.start_file_watcher().unwrap();

        std::fs::write(&pack_path, create_test_pack_toml("renamed_quest")).unwrap();

        // A write can surface as several events; wait for the one that saw the new tag
        let path = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match reloads.recv().await {
                    Some(HotReloadEvent::Reloaded(path))
                        if registry.get("renamed_quest").is_some() =>
                    {
                        return path;
                    }
                    Some(_) => {}
                    None => panic!("watcher stopped"),
                }
            }
        })
        .await
        .unwrap();

        assert!(path.ends_with("test.toml"));
        assert!(registry.get("test_quest").is_none());
        assert_eq!(registry.count(), 1);
    }
}
