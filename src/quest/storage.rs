//! Quest Node Storage
//!
//! Owns the loaded node instances of one quest graph. Nodes are loaded
//! lazily through a [`NodeLoader`], shared by every player that references
//! them, and disposed the moment their reference count returns to zero.
//!
//! References are handed out as [`NodeLease`] tokens. A lease can only be
//! created by [`NodeStorage::increment`] and is consumed by
//! [`NodeStorage::decrement`], so the number of outstanding leases for a node
//! is always its reference count.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::cursor::{Cursor, NodeId};
use super::error::GraphError;
use super::events::{ReevaluateSignal, ReevaluationRequest};
use super::node::{NodeLoader, QuestNode};

/// One counted reference to a loaded node
#[must_use = "a lease must be handed back to NodeStorage::decrement"]
pub struct NodeLease {
    id: NodeId,
}

impl NodeLease {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl fmt::Debug for NodeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeLease({})", self.id)
    }
}

/// A loaded node and the number of live leases on it
struct NodeEntry {
    node: Box<dyn QuestNode>,
    ref_count: u32,
}

/// Loaded nodes of one quest graph
pub struct NodeStorage {
    quest_tag: String,
    loader: Arc<dyn NodeLoader>,
    /// Handed to every loaded node as its re-evaluation signal
    signal_tx: mpsc::UnboundedSender<ReevaluationRequest>,
    entries: HashMap<NodeId, NodeEntry>,
}

impl NodeStorage {
    pub fn new(
        quest_tag: &str,
        loader: Arc<dyn NodeLoader>,
        signal_tx: mpsc::UnboundedSender<ReevaluationRequest>,
    ) -> Self {
        Self {
            quest_tag: quest_tag.to_string(),
            loader,
            signal_tx,
            entries: HashMap::new(),
        }
    }

    pub fn quest_tag(&self) -> &str {
        &self.quest_tag
    }

    /// Get the node under `cursor`, loading it if needed.
    ///
    /// Returns `Ok(None)` when the cursor is off-graph or the loader has no
    /// such node. A freshly loaded node starts with a reference count of 0.
    pub fn get_or_create_node(
        &mut self,
        cursor: Cursor,
    ) -> Result<Option<&mut (dyn QuestNode + 'static)>, GraphError> {
        if !cursor.is_valid() {
            return Ok(None);
        }

        let id = cursor.node;
        if !self.entries.contains_key(&id) {
            if !cursor.is_at_root() && !self.entries.contains_key(&cursor.root) {
                error!(
                    "Quest '{}': node {} requested before its root {} was loaded",
                    self.quest_tag, id, cursor.root
                );
                return Err(GraphError::RootNotLoaded {
                    root: cursor.root,
                    node: id,
                });
            }

            let Some(mut node) = self.loader.load_node(&self.quest_tag, id) else {
                warn!("Quest '{}': failed to load node {}", self.quest_tag, id);
                return Ok(None);
            };

            if node.id() != id {
                error!(
                    "Quest '{}': loader returned node {} for id {}",
                    self.quest_tag,
                    node.id(),
                    id
                );
                return Err(GraphError::NodeIdMismatch {
                    requested: id,
                    actual: node.id(),
                });
            }

            node.subscribe(ReevaluateSignal::new(id, self.signal_tx.clone()));
            debug!("Quest '{}': loaded node {}", self.quest_tag, id);
            self.entries.insert(id, NodeEntry { node, ref_count: 0 });
        }

        Ok(self.entries.get_mut(&id).map(|entry| entry.node.as_mut()))
    }

    /// Look up a loaded node without touching its reference count
    pub fn node(&self, id: NodeId) -> Option<&(dyn QuestNode + 'static)> {
        self.entries.get(&id).map(|entry| entry.node.as_ref())
    }

    /// Mutable lookup, used for transient `reset`/`enter` calls
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut (dyn QuestNode + 'static)> {
        self.entries.get_mut(&id).map(|entry| entry.node.as_mut())
    }

    /// Take one reference on a loaded node
    pub fn increment(&mut self, id: NodeId) -> Result<NodeLease, GraphError> {
        let Some(entry) = self.entries.get_mut(&id) else {
            error!("Quest '{}': increment on unloaded node {}", self.quest_tag, id);
            return Err(GraphError::UnknownNode(id));
        };
        entry.ref_count += 1;
        Ok(NodeLease { id })
    }

    /// Give a reference back. Disposes the node when it was the last one
    /// and returns the remaining count.
    pub fn decrement(&mut self, lease: NodeLease) -> Result<u32, GraphError> {
        let id = lease.id;
        let Some(entry) = self.entries.get_mut(&id) else {
            error!("Quest '{}': decrement on unloaded node {}", self.quest_tag, id);
            return Err(GraphError::UnknownNode(id));
        };

        if entry.ref_count == 0 {
            error!("Quest '{}': refcount underflow on node {}", self.quest_tag, id);
            return Err(GraphError::RefCountUnderflow(id));
        }

        entry.ref_count -= 1;
        let remaining = entry.ref_count;
        if remaining == 0 {
            if let Some(entry) = self.entries.remove(&id) {
                self.dispose_entry(id, entry);
            }
        }
        Ok(remaining)
    }

    pub fn ref_count(&self, id: NodeId) -> Option<u32> {
        self.entries.get(&id).map(|entry| entry.ref_count)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loaded node ids, sorted
    pub fn loaded_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Dispose nodes that were loaded but never referenced.
    ///
    /// A chain walk loads every node it inspects; the ones no player ended up
    /// holding are released here.
    pub fn sweep_unreferenced(&mut self) -> usize {
        let mut idle: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0)
            .map(|(id, _)| *id)
            .collect();
        idle.sort_unstable();

        for id in &idle {
            if let Some(entry) = self.entries.remove(id) {
                self.dispose_entry(*id, entry);
            }
        }

        if !idle.is_empty() {
            debug!(
                "Quest '{}': swept {} unreferenced nodes",
                self.quest_tag,
                idle.len()
            );
        }
        idle.len()
    }

    /// Dispose every remaining node. Nodes still referenced are reported as
    /// leaks and returned as `(id, refcount)` pairs.
    pub fn dispose(&mut self) -> Vec<(NodeId, u32)> {
        let mut leaks = Vec::new();

        for id in self.loaded_ids() {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            if entry.ref_count != 0 {
                warn!(
                    "Quest '{}': node {} leaked with refcount {}",
                    self.quest_tag, id, entry.ref_count
                );
                leaks.push((id, entry.ref_count));
            }
            self.dispose_entry(id, entry);
        }

        leaks
    }

    fn dispose_entry(&self, id: NodeId, mut entry: NodeEntry) {
        entry.node.unsubscribe();
        entry.node.dispose();
        debug!("Quest '{}': disposed node {}", self.quest_tag, id);
    }
}

impl Drop for NodeStorage {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NodeCall, NodeSpec, ScriptedContent};

    fn storage_for(content: &ScriptedContent) -> NodeStorage {
        let (tx, _rx) = mpsc::unbounded_channel();
        NodeStorage::new("test_quest", content.loader(), tx)
    }

    fn two_node_content() -> ScriptedContent {
        ScriptedContent::with_nodes([NodeSpec::root(0, 1), NodeSpec::step(1, -1)])
    }

    #[test]
    fn test_lazy_load_and_cache() {
        let content = two_node_content();
        let mut storage = storage_for(&content);

        assert!(storage.get_or_create_node(Cursor::at_root(0)).unwrap().is_some());
        assert!(storage.get_or_create_node(Cursor::at_root(0)).unwrap().is_some());
        assert_eq!(content.loads(), 1);
        assert_eq!(storage.ref_count(0), Some(0));
    }

    #[test]
    fn test_off_graph_and_missing_nodes() {
        let content = two_node_content();
        let mut storage = storage_for(&content);

        assert!(storage.get_or_create_node(Cursor::NONE).unwrap().is_none());
        assert!(storage.get_or_create_node(Cursor::at_root(9)).unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_child_before_root_is_rejected() {
        let content = two_node_content();
        let mut storage = storage_for(&content);

        let result = storage.get_or_create_node(Cursor::new(0, 1));
        assert!(matches!(
            result,
            Err(GraphError::RootNotLoaded { root: 0, node: 1 })
        ));

        storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        assert!(storage.get_or_create_node(Cursor::new(0, 1)).unwrap().is_some());
    }

    #[test]
    fn test_loader_id_mismatch() {
        let loader = |_: &str, _: NodeId| {
            let content = ScriptedContent::with_nodes([NodeSpec::root(5, -1)]);
            content.loader().load_node("test_quest", 5)
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut storage = NodeStorage::new("test_quest", Arc::new(loader), tx);

        let result = storage.get_or_create_node(Cursor::at_root(2));
        assert!(matches!(
            result,
            Err(GraphError::NodeIdMismatch {
                requested: 2,
                actual: 5
            })
        ));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_refcount_disposes_at_zero() {
        let content = two_node_content();
        let mut storage = storage_for(&content);
        storage.get_or_create_node(Cursor::at_root(0)).unwrap();

        let first = storage.increment(0).unwrap();
        let second = storage.increment(0).unwrap();
        assert_eq!(storage.ref_count(0), Some(2));

        assert_eq!(storage.decrement(first).unwrap(), 1);
        assert!(storage.contains(0));
        assert_eq!(content.disposals_of(0), 0);

        assert_eq!(storage.decrement(second).unwrap(), 0);
        assert!(!storage.contains(0));
        assert_eq!(content.disposals_of(0), 1);
    }

    #[test]
    fn test_increment_unknown_node() {
        let content = two_node_content();
        let mut storage = storage_for(&content);
        assert_eq!(storage.increment(0).unwrap_err(), GraphError::UnknownNode(0));
    }

    #[test]
    fn test_decrement_underflow() {
        let content = two_node_content();
        let mut storage = storage_for(&content);
        storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        let lease = storage.increment(0).unwrap();

        // Reload the same id in a second storage where it was never counted
        let mut other = storage_for(&content);
        other.get_or_create_node(Cursor::at_root(0)).unwrap();
        assert_eq!(
            other.decrement(lease).unwrap_err(),
            GraphError::RefCountUnderflow(0)
        );
    }

    #[test]
    fn test_sweep_only_touches_unreferenced() {
        let content = two_node_content();
        let mut storage = storage_for(&content);
        storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        storage.get_or_create_node(Cursor::new(0, 1)).unwrap();
        let lease = storage.increment(0).unwrap();

        assert_eq!(storage.sweep_unreferenced(), 1);
        assert_eq!(storage.loaded_ids(), vec![0]);
        assert_eq!(content.disposals_of(1), 1);

        storage.decrement(lease).unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_dispose_reports_leaks() {
        let content = two_node_content();
        let mut storage = storage_for(&content);
        storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        storage.get_or_create_node(Cursor::new(0, 1)).unwrap();
        let _held = storage.increment(1).unwrap();
        let _held_again = storage.increment(1).unwrap();

        let leaks = storage.dispose();
        assert_eq!(leaks, vec![(1, 2)]);
        assert!(storage.is_empty());
        assert_eq!(content.disposals_of(0), 1);
        assert_eq!(content.disposals_of(1), 1);
    }

    #[test]
    fn test_drop_disposes_remaining_nodes() {
        let content = two_node_content();
        {
            let mut storage = storage_for(&content);
            storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        }
        assert!(content.calls().contains(&NodeCall::Dispose(0)));
    }
}
