//! Quest Node Contract
//!
//! What the graph engine needs from a node. Concrete behaviors (kill,
//! collect, dialogue...) live behind this trait and are never inspected.

use super::cursor::NodeId;
use super::events::{QuestEvent, ReevaluateSignal};
use super::player::PlayerId;

/// Where a chain goes after a node evaluates successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextNode {
    /// Advance to another node of the same quest
    Node(NodeId),
    /// Stop here and wait for an external trigger
    Suspend,
    /// The quest chain is finished
    Complete,
}

impl NextNode {
    pub const SUSPEND: i32 = -1;
    pub const COMPLETE: i32 = -2;

    /// Parse the integer form used by quest content
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            Self::SUSPEND => Some(NextNode::Suspend),
            Self::COMPLETE => Some(NextNode::Complete),
            id if id >= 0 => Some(NextNode::Node(id)),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            NextNode::Node(id) => *id,
            NextNode::Suspend => Self::SUSPEND,
            NextNode::Complete => Self::COMPLETE,
        }
    }
}

/// A loaded quest node, shared by every player standing on it
pub trait QuestNode: Send + 'static {
    fn id(&self) -> NodeId;

    /// Successor for `player`, read right after a successful `evaluate`
    fn next_id(&self, player: &PlayerId) -> NextNode;

    /// Nodes without a lifetime parent; also chain evaluation boundaries
    fn is_root(&self) -> bool;

    /// Safe place to resume from after a downstream failure
    fn is_rollback_point(&self) -> bool;

    fn evaluate(&mut self, player: &PlayerId) -> bool;

    fn enter(&mut self, player: &PlayerId);

    /// Drop whatever this node tracks for `player`
    fn reset(&mut self, player: &PlayerId);

    fn dispose(&mut self);

    fn subscribe(&mut self, _signal: ReevaluateSignal) {}

    fn unsubscribe(&mut self) {}

    /// Gameplay event for a player currently holding this node
    fn handle_event(&mut self, _player: &PlayerId, _event: &QuestEvent) {}
}

/// Source of node instances, keyed by quest tag and node id.
///
/// Loading is synchronous from the graph's point of view, so loaders must
/// be fast.
pub trait NodeLoader: Send + Sync {
    fn load_node(&self, quest_tag: &str, node_id: NodeId) -> Option<Box<dyn QuestNode>>;
}

impl<F> NodeLoader for F
where
    F: Fn(&str, NodeId) -> Option<Box<dyn QuestNode>> + Send + Sync,
{
    fn load_node(&self, quest_tag: &str, node_id: NodeId) -> Option<Box<dyn QuestNode>> {
        self(quest_tag, node_id)
    }
}
