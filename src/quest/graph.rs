//! Quest Graph
//!
//! Façade over one quest's node storage and player sessions. Validates
//! calls, walks chains, applies the caller's evaluation policy and hands the
//! outcome to the session.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::cursor::{Cursor, NodeId};
use super::error::GraphError;
use super::events::{QuestCompleted, QuestEvent, ReevaluationRequest};
use super::node::NodeLoader;
use super::player::PlayerId;
use super::runtime::{ChainRuntime, EvalResult, EvaluationOutcome};
use super::session::{PlayerState, Session};
use super::snapshot::QuestSnapshot;
use super::storage::NodeStorage;

/// Override for what a successful walk does to the player.
///
/// Only `Success` outcomes are rewritten; `SkipToNextRoot` does not walk at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationPolicy {
    /// Apply the outcome unchanged
    #[default]
    AutoProceed,
    /// Stay on the chain's last node instead of entering the next root
    SuspendOnLeaf,
    /// Roll back to the starting cursor, keeping node progress
    RollbackToRoot,
    /// Fail back to the chain root, discarding node progress
    ResetChain,
    /// Jump straight to the given root without evaluating anything
    SkipToNextRoot(NodeId),
}

/// One quest's graph and every player on it
pub struct QuestGraph {
    quest_tag: String,
    storage: NodeStorage,
    session: Session,
    requests: mpsc::UnboundedReceiver<ReevaluationRequest>,
    completed_tx: broadcast::Sender<QuestCompleted>,
}

impl QuestGraph {
    pub fn new(quest_tag: &str, loader: Arc<dyn NodeLoader>) -> Self {
        let (completed_tx, _) = broadcast::channel(64);
        Self::with_notifier(quest_tag, loader, completed_tx)
    }

    /// Build a graph that reports completions on a shared channel
    pub fn with_notifier(
        quest_tag: &str,
        loader: Arc<dyn NodeLoader>,
        completed_tx: broadcast::Sender<QuestCompleted>,
    ) -> Self {
        let (signal_tx, requests) = mpsc::unbounded_channel();
        Self {
            quest_tag: quest_tag.to_string(),
            storage: NodeStorage::new(quest_tag, loader, signal_tx),
            session: Session::new(quest_tag, completed_tx.clone()),
            requests,
            completed_tx,
        }
    }

    pub fn quest_tag(&self) -> &str {
        &self.quest_tag
    }

    pub fn subscribe_completed(&self) -> broadcast::Receiver<QuestCompleted> {
        self.completed_tx.subscribe()
    }

    pub fn storage(&self) -> &NodeStorage {
        &self.storage
    }

    pub fn player_state(&self, player: &PlayerId) -> Option<&PlayerState> {
        self.session.state(player)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        self.session.players()
    }

    pub fn player_count(&self) -> usize {
        self.session.len()
    }

    pub fn cursor(&self, player: &PlayerId) -> Option<Cursor> {
        self.session.state(player).map(PlayerState::cursor)
    }

    /// Root of the chain the player is on
    pub fn root_node(&self, player: &PlayerId) -> Option<NodeId> {
        self.cursor(player)
            .filter(Cursor::is_valid)
            .map(|cursor| cursor.root)
    }

    /// Put a new player on `root`
    pub fn add_player(&mut self, player: &PlayerId, root: NodeId) -> Result<(), GraphError> {
        let result = self.session.enter_graph(&mut self.storage, player, root);
        self.storage.sweep_unreferenced();
        result
    }

    /// Put a player back where a snapshot left them
    pub fn restore_player(
        &mut self,
        player: &PlayerId,
        snapshot: &QuestSnapshot,
    ) -> Result<(), GraphError> {
        let result = self.session.restore_graph(&mut self.storage, player, snapshot);
        self.storage.sweep_unreferenced();
        result
    }

    pub fn remove_player(&mut self, player: &PlayerId) -> Result<(), GraphError> {
        self.session.exit_graph(&mut self.storage, player)
    }

    pub fn capture_snapshot(&self, player: &PlayerId) -> Result<QuestSnapshot, GraphError> {
        self.session.snapshot(player)
    }

    pub fn move_player(&mut self, player: &PlayerId, root: NodeId) -> Result<(), GraphError> {
        let result = self.session.move_player(&mut self.storage, player, root);
        self.storage.sweep_unreferenced();
        result
    }

    /// Evaluate the player's chain. `id` must be the root or the node of the
    /// player's cursor; the walk always starts from the cursor.
    pub fn evaluate(
        &mut self,
        id: NodeId,
        player: &PlayerId,
        policy: EvaluationPolicy,
    ) -> Result<EvaluationOutcome, GraphError> {
        let cursor = self
            .cursor(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;

        if !cursor.is_valid() || (id != cursor.root && id != cursor.node) {
            warn!(
                "Quest '{}': evaluate({}) does not match cursor {} of player {}",
                self.quest_tag, id, cursor, player
            );
            return Err(GraphError::CursorMismatch {
                player: player.clone(),
                id,
                cursor,
            });
        }

        let result = self.run_evaluation(cursor, player, policy);
        self.storage.sweep_unreferenced();

        match &result {
            Ok(outcome) => debug!(
                "Quest '{}': player {} {} -> {} ({})",
                self.quest_tag,
                player,
                outcome.old_cursor,
                outcome.new_cursor,
                outcome.result.as_str()
            ),
            Err(e) if e.is_invariant_violation() => error!(
                "Quest '{}': evaluation for player {} broke an invariant: {}",
                self.quest_tag, player, e
            ),
            Err(e) => warn!(
                "Quest '{}': evaluation for player {} failed: {}",
                self.quest_tag, player, e
            ),
        }
        result
    }

    fn run_evaluation(
        &mut self,
        cursor: Cursor,
        player: &PlayerId,
        policy: EvaluationPolicy,
    ) -> Result<EvaluationOutcome, GraphError> {
        if let EvaluationPolicy::SkipToNextRoot(target) = policy {
            self.session.move_player(&mut self.storage, player, target)?;
            self.session.record_result(player, EvalResult::Success)?;
            return Ok(EvaluationOutcome {
                old_cursor: cursor,
                new_cursor: Cursor::at_root(target),
                visited: Vec::new(),
                result: EvalResult::Success,
            });
        }

        let checkpoint = self
            .session
            .resume_checkpoint(&self.storage, player)
            .unwrap_or(Cursor::at_root(cursor.root));
        let outcome = ChainRuntime::evaluate(&mut self.storage, cursor, checkpoint, player)?;
        let outcome = apply_policy(outcome, policy);
        self.session.apply_outcome(&mut self.storage, &outcome, player)?;
        Ok(outcome)
    }

    /// Forward a gameplay event to every node the player holds
    pub fn dispatch_event(&mut self, player: &PlayerId, event: &QuestEvent) -> usize {
        let Some(state) = self.session.state(player) else {
            return 0;
        };

        let mut ids = state.footprint_ids();
        ids.sort_unstable();
        ids.dedup();

        for id in &ids {
            if let Some(node) = self.storage.node_mut(*id) {
                node.handle_event(player, event);
            }
        }
        ids.len()
    }

    /// Run the re-evaluations nodes queued since the last call.
    ///
    /// Requests raised while these run stay queued for the next call.
    /// Stops at the first invariant violation and returns it; the graph
    /// should not be used after that.
    pub fn process_reevaluations(&mut self) -> Result<Vec<EvaluationOutcome>, GraphError> {
        let mut pending: Vec<ReevaluationRequest> = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            if !pending.contains(&request) {
                pending.push(request);
            }
        }

        let mut outcomes = Vec::new();
        for request in pending {
            let Some(cursor) = self.cursor(&request.player) else {
                debug!(
                    "Quest '{}': dropping re-evaluation for departed player {}",
                    self.quest_tag, request.player
                );
                continue;
            };
            let on_cursor = request.node_id == cursor.root || request.node_id == cursor.node;
            if !cursor.is_valid() || !on_cursor {
                debug!(
                    "Quest '{}': dropping stale re-evaluation of node {} for player {} at {}",
                    self.quest_tag, request.node_id, request.player, cursor
                );
                continue;
            }

            match self.evaluate(request.node_id, &request.player, EvaluationPolicy::AutoProceed) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_invariant_violation() => return Err(e),
                // Already logged by evaluate
                Err(_) => {}
            }
        }
        Ok(outcomes)
    }

    /// Tear the graph down. Players still registered and nodes still
    /// referenced are reported; the returned pairs are `(node, refcount)`.
    pub fn dispose(mut self) -> Vec<(NodeId, u32)> {
        for player in self.session.players() {
            warn!(
                "Quest '{}' disposed while player {} is still on it",
                self.quest_tag, player
            );
        }
        let leaks = self.storage.dispose();
        info!(
            "Quest '{}' disposed ({} leaked nodes)",
            self.quest_tag,
            leaks.len()
        );
        leaks
    }
}

/// Rewrite a successful outcome according to `policy`
fn apply_policy(mut outcome: EvaluationOutcome, policy: EvaluationPolicy) -> EvaluationOutcome {
    if outcome.result != EvalResult::Success {
        return outcome;
    }

    let start = outcome.old_cursor;
    match policy {
        EvaluationPolicy::AutoProceed | EvaluationPolicy::SkipToNextRoot(_) => {}
        EvaluationPolicy::SuspendOnLeaf => {
            // The root the walk stopped on is left unreferenced and swept
            let leaf = outcome.visited.last().copied().unwrap_or(start.node);
            outcome.new_cursor = Cursor::new(start.root, leaf);
            outcome.result = EvalResult::Suspend;
        }
        EvaluationPolicy::RollbackToRoot => {
            outcome.new_cursor = start;
            outcome.result = EvalResult::Rollback;
        }
        EvaluationPolicy::ResetChain => {
            outcome.new_cursor = Cursor::at_root(start.root);
            outcome.result = EvalResult::Failure;
        }
    }
    outcome
}
