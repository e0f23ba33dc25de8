use thiserror::Error;

use super::cursor::{Cursor, NodeId};
use super::player::PlayerId;

/// Errors raised by the quest graph engine.
///
/// Invariant violations mean the graph or its content is already
/// inconsistent; the rest are expected conditions that leave the player's
/// position untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {node} requested before its root {root} was loaded")]
    RootNotLoaded { root: NodeId, node: NodeId },

    #[error("node {0} is not loaded")]
    UnknownNode(NodeId),

    #[error("refcount underflow on node {0}")]
    RefCountUnderflow(NodeId),

    #[error("loader returned node {actual} when asked for {requested}")]
    NodeIdMismatch { requested: NodeId, actual: NodeId },

    #[error("player {0} is already on this graph")]
    PlayerAlreadyRegistered(PlayerId),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("player {0} is not on this graph")]
    UnknownPlayer(PlayerId),

    #[error("node {id} matches neither root nor node of {player}'s cursor {cursor}")]
    CursorMismatch {
        player: PlayerId,
        id: NodeId,
        cursor: Cursor,
    },

    #[error("node {0} could not be loaded")]
    NodeUnavailable(NodeId),

    #[error("node {0} is not a root")]
    NotARoot(NodeId),
}

impl GraphError {
    /// Whether this error means the graph must not be trusted any further
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            GraphError::RootNotLoaded { .. }
                | GraphError::UnknownNode(_)
                | GraphError::RefCountUnderflow(_)
                | GraphError::NodeIdMismatch { .. }
                | GraphError::PlayerAlreadyRegistered(_)
                | GraphError::MalformedSnapshot(_)
        )
    }
}
