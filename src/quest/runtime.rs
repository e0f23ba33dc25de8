//! Chain Runtime
//!
//! Walks one linear chain of nodes from a starting cursor until it reaches
//! another root, a suspend or complete sentinel, a failing node, or the
//! length bound. The walk is iterative and never follows a node's own
//! re-evaluation signal, so cyclic content ends in a bounded `Error`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cursor::{Cursor, NodeId};
use super::error::GraphError;
use super::node::NextNode;
use super::player::PlayerId;
use super::storage::NodeStorage;

/// Maximum number of nodes a single walk may inspect
pub const MAX_CHAIN_LENGTH: usize = 100;

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalResult {
    /// Reached another root (or the chain's own root again)
    Success,
    /// The chain's root itself failed
    Failure,
    /// A node past the root failed; resume from the checkpoint
    Rollback,
    /// Waiting on an external trigger
    Suspend,
    /// The quest chain is finished
    Complete,
    /// Unresolvable node or runaway chain; position unchanged
    Error,
}

impl EvalResult {
    /// Integer code used in snapshots
    pub fn code(self) -> i32 {
        match self {
            EvalResult::Success => 1,
            EvalResult::Failure => 2,
            EvalResult::Rollback => 3,
            EvalResult::Suspend => 4,
            EvalResult::Complete => 5,
            EvalResult::Error => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(EvalResult::Success),
            2 => Some(EvalResult::Failure),
            3 => Some(EvalResult::Rollback),
            4 => Some(EvalResult::Suspend),
            5 => Some(EvalResult::Complete),
            6 => Some(EvalResult::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvalResult::Success => "success",
            EvalResult::Failure => "failure",
            EvalResult::Rollback => "rollback",
            EvalResult::Suspend => "suspend",
            EvalResult::Complete => "complete",
            EvalResult::Error => "error",
        }
    }
}

/// Result of one evaluation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub old_cursor: Cursor,
    pub new_cursor: Cursor,
    /// Nodes walked past the starting node, in order
    pub visited: Vec<NodeId>,
    pub result: EvalResult,
}

impl EvaluationOutcome {
    fn new(start: Cursor, new_cursor: Cursor, visited: Vec<NodeId>, result: EvalResult) -> Self {
        Self {
            old_cursor: start,
            new_cursor,
            visited,
            result,
        }
    }
}

/// Stateless chain evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainRuntime;

impl ChainRuntime {
    /// Walk the chain under `start` for `player`.
    ///
    /// `checkpoint` is where a failing node rolls back to unless the walk
    /// passes a newer rollback point. Nodes are loaded through `storage` but
    /// no reference counts are touched.
    pub fn evaluate(
        storage: &mut NodeStorage,
        start: Cursor,
        checkpoint: Cursor,
        player: &PlayerId,
    ) -> Result<EvaluationOutcome, GraphError> {
        let mut cursor = start;
        let mut checkpoint = checkpoint;
        let mut visited = Vec::new();

        for step in 0..MAX_CHAIN_LENGTH {
            let first = step == 0;

            let Some(node) = storage.get_or_create_node(cursor)? else {
                warn!(
                    "Quest '{}': cannot resolve node at {} for player {}",
                    storage.quest_tag(),
                    cursor,
                    player
                );
                return Ok(EvaluationOutcome::new(start, start, visited, EvalResult::Error));
            };

            if node.is_root() && !first {
                return Ok(EvaluationOutcome::new(
                    start,
                    Cursor::at_root(cursor.node),
                    visited,
                    EvalResult::Success,
                ));
            }

            if !first {
                visited.push(cursor.node);
            }

            if !node.evaluate(player) {
                if node.is_root() {
                    return Ok(EvaluationOutcome::new(
                        start,
                        Cursor::at_root(start.root),
                        visited,
                        EvalResult::Failure,
                    ));
                }
                debug!(
                    "Quest '{}': node {} failed for player {}, rolling back to {}",
                    storage.quest_tag(),
                    cursor.node,
                    player,
                    checkpoint
                );
                return Ok(EvaluationOutcome::new(
                    start,
                    checkpoint,
                    visited,
                    EvalResult::Rollback,
                ));
            }

            match node.next_id(player) {
                NextNode::Suspend => {
                    return Ok(EvaluationOutcome::new(start, cursor, visited, EvalResult::Suspend));
                }
                NextNode::Complete => {
                    return Ok(EvaluationOutcome::new(
                        start,
                        Cursor::NONE,
                        visited,
                        EvalResult::Complete,
                    ));
                }
                NextNode::Node(next) => {
                    if node.is_rollback_point() {
                        checkpoint = cursor;
                    }
                    cursor = cursor.advance(next);
                }
            }
        }

        warn!(
            "Quest '{}': chain from {} exceeded {} nodes for player {}",
            storage.quest_tag(),
            start,
            MAX_CHAIN_LENGTH,
            player
        );
        Ok(EvaluationOutcome::new(start, start, visited, EvalResult::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NodeSpec, ScriptedContent};
    use tokio::sync::mpsc;

    fn storage_for(content: &ScriptedContent) -> NodeStorage {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut storage = NodeStorage::new("test_quest", content.loader(), tx);
        // Every walk in these tests starts on root 0, which a player would hold
        storage.get_or_create_node(Cursor::at_root(0)).unwrap();
        storage
    }

    fn walk(content: &ScriptedContent, start: Cursor) -> EvaluationOutcome {
        let mut storage = storage_for(content);
        ChainRuntime::evaluate(
            &mut storage,
            start,
            Cursor::at_root(start.root),
            &PlayerId::new("alice"),
        )
        .unwrap()
    }

    #[test]
    fn test_suspend_stops_at_node() {
        let content = ScriptedContent::with_nodes([NodeSpec::root(0, 1), NodeSpec::step(1, -1)]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Suspend);
        assert_eq!(outcome.new_cursor, Cursor::new(0, 1));
        assert_eq!(outcome.visited, vec![1]);
    }

    #[test]
    fn test_reaching_root_is_success() {
        let content = ScriptedContent::with_nodes([
            NodeSpec::root(0, 1),
            NodeSpec::step(1, 2),
            NodeSpec::root(2, -1),
        ]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Success);
        assert_eq!(outcome.new_cursor, Cursor::at_root(2));
        assert_eq!(outcome.visited, vec![1]);
        // The next root is a boundary, not evaluated
        assert_eq!(content.evaluations_of(2), 0);
    }

    #[test]
    fn test_complete_sentinel() {
        let content = ScriptedContent::with_nodes([NodeSpec::root(0, 1), NodeSpec::step(1, -2)]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Complete);
        assert_eq!(outcome.new_cursor, Cursor::NONE);
    }

    #[test]
    fn test_failing_root_is_failure() {
        let content = ScriptedContent::with_nodes([NodeSpec::root(0, 1).failing()]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Failure);
        assert_eq!(outcome.new_cursor, Cursor::at_root(0));
        assert!(outcome.visited.is_empty());
    }

    #[test]
    fn test_rollback_to_last_checkpoint() {
        let content = ScriptedContent::with_nodes([
            NodeSpec::root(0, 1),
            NodeSpec::step(1, 2),
            NodeSpec::step(2, 3).rollback_point(),
            NodeSpec::step(3, 4),
            NodeSpec::step(4, -1).failing(),
        ]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Rollback);
        assert_eq!(outcome.new_cursor, Cursor::new(0, 2));
        assert_eq!(outcome.visited, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rollback_without_checkpoint_returns_to_root() {
        let content = ScriptedContent::with_nodes([
            NodeSpec::root(0, 1),
            NodeSpec::step(1, 2),
            NodeSpec::step(2, -1).failing(),
        ]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Rollback);
        assert_eq!(outcome.new_cursor, Cursor::at_root(0));
    }

    #[test]
    fn test_unresolvable_node_is_error() {
        let content = ScriptedContent::with_nodes([NodeSpec::root(0, 7)]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Error);
        assert_eq!(outcome.new_cursor, Cursor::at_root(0));
    }

    #[test]
    fn test_off_graph_start_is_error() {
        let content = ScriptedContent::with_nodes([NodeSpec::root(0, -1)]);
        let outcome = walk(&content, Cursor::NONE);
        assert_eq!(outcome.result, EvalResult::Error);
    }

    #[test]
    fn test_cycle_hits_bound() {
        let content = ScriptedContent::with_nodes([
            NodeSpec::root(0, 1),
            NodeSpec::step(1, 2),
            NodeSpec::step(2, 1),
        ]);
        let outcome = walk(&content, Cursor::at_root(0));

        assert_eq!(outcome.result, EvalResult::Error);
        assert_eq!(outcome.new_cursor, Cursor::at_root(0));
        assert_eq!(outcome.visited.len(), MAX_CHAIN_LENGTH - 1);
    }

    #[test]
    fn test_chain_length_boundary() {
        // Start root + intermediate nodes + terminating root
        let exact = ScriptedContent::linear_chain(MAX_CHAIN_LENGTH);
        assert_eq!(walk(&exact, Cursor::at_root(0)).result, EvalResult::Success);

        let too_long = ScriptedContent::linear_chain(MAX_CHAIN_LENGTH + 1);
        assert_eq!(walk(&too_long, Cursor::at_root(0)).result, EvalResult::Error);
    }

    #[test]
    fn test_result_codes() {
        for result in [
            EvalResult::Success,
            EvalResult::Failure,
            EvalResult::Rollback,
            EvalResult::Suspend,
            EvalResult::Complete,
            EvalResult::Error,
        ] {
            assert_eq!(EvalResult::from_code(result.code()), Some(result));
        }
        assert_eq!(EvalResult::from_code(0), None);
        assert_eq!(EvalResult::from_code(42), None);
    }
}
