//! Player Sessions
//!
//! Per-player structural state on one quest graph, and the only place that
//! turns an evaluation outcome into reference-count changes.
//!
//! Every footprint is a [`NodeLease`], so a player's stack of footprints is
//! exactly the set of references it holds in [`NodeStorage`]. The bottom
//! footprint is always the root of the active chain and the top one is the
//! node under the cursor.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::cursor::{Cursor, NodeId};
use super::error::GraphError;
use super::events::QuestCompleted;
use super::player::PlayerId;
use super::runtime::{EvalResult, EvaluationOutcome};
use super::snapshot::QuestSnapshot;
use super::storage::{NodeLease, NodeStorage};

/// Structural state of one player on one graph
#[derive(Debug)]
pub struct PlayerState {
    cursor: Cursor,
    /// Chains this player has finished, oldest first
    completed_chains: Vec<Cursor>,
    footprints: Vec<NodeLease>,
    last_result: Option<EvalResult>,
}

impl PlayerState {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn completed_chains(&self) -> &[Cursor] {
        &self.completed_chains
    }

    /// Footprint node ids, bottom (root) first
    pub fn footprint_ids(&self) -> Vec<NodeId> {
        self.footprints.iter().map(NodeLease::id).collect()
    }

    pub fn last_result(&self) -> Option<EvalResult> {
        self.last_result
    }

    /// Whether the player stands on the graph (false once completed)
    pub fn is_on_graph(&self) -> bool {
        self.cursor.is_valid()
    }
}

/// All players on one quest graph
pub struct Session {
    quest_tag: String,
    players: HashMap<PlayerId, PlayerState>,
    completed_tx: broadcast::Sender<QuestCompleted>,
}

impl Session {
    pub fn new(quest_tag: &str, completed_tx: broadcast::Sender<QuestCompleted>) -> Self {
        Self {
            quest_tag: quest_tag.to_string(),
            players: HashMap::new(),
            completed_tx,
        }
    }

    pub fn state(&self, player: &PlayerId) -> Option<&PlayerState> {
        self.players.get(player)
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.players.contains_key(player)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.keys()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Register a player standing fresh on `root`
    pub fn enter_graph(
        &mut self,
        storage: &mut NodeStorage,
        player: &PlayerId,
        root: NodeId,
    ) -> Result<(), GraphError> {
        if self.players.contains_key(player) {
            return Err(GraphError::PlayerAlreadyRegistered(player.clone()));
        }

        let lease = acquire_root(storage, root)?;
        if let Some(node) = storage.node_mut(root) {
            node.enter(player);
        }

        self.players.insert(
            player.clone(),
            PlayerState {
                cursor: Cursor::at_root(root),
                completed_chains: Vec::new(),
                footprints: vec![lease],
                last_result: None,
            },
        );
        info!("Player {} entered quest '{}' at root {}", player, self.quest_tag, root);
        Ok(())
    }

    /// Register a player from a captured snapshot.
    ///
    /// Either every footprint is loaded and referenced or none is.
    pub fn restore_graph(
        &mut self,
        storage: &mut NodeStorage,
        player: &PlayerId,
        snapshot: &QuestSnapshot,
    ) -> Result<(), GraphError> {
        if self.players.contains_key(player) {
            return Err(GraphError::PlayerAlreadyRegistered(player.clone()));
        }

        let mut footprints = Vec::with_capacity(snapshot.footprints.len());
        if let Some(&root) = snapshot.footprints.first() {
            for (index, &id) in snapshot.footprints.iter().enumerate() {
                let acquired = if index == 0 {
                    acquire_root(storage, root)
                } else {
                    acquire_node(storage, Cursor::new(root, id))
                };
                match acquired {
                    Ok(lease) => footprints.push(lease),
                    Err(e) => {
                        warn!(
                            "Restoring player {} on quest '{}' failed at node {}: {}",
                            player, self.quest_tag, id, e
                        );
                        release_all(storage, &mut footprints, player, false)?;
                        return Err(e);
                    }
                }
            }
        }

        for lease in &footprints {
            if let Some(node) = storage.node_mut(lease.id()) {
                node.enter(player);
            }
        }

        let cursor = snapshot.cursor();
        self.players.insert(
            player.clone(),
            PlayerState {
                cursor,
                completed_chains: snapshot.completed_chains.clone(),
                footprints,
                last_result: snapshot.last_result,
            },
        );
        info!("Player {} restored on quest '{}' at {}", player, self.quest_tag, cursor);
        Ok(())
    }

    /// Release every footprint and forget the player
    pub fn exit_graph(
        &mut self,
        storage: &mut NodeStorage,
        player: &PlayerId,
    ) -> Result<(), GraphError> {
        let mut state = self
            .players
            .remove(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;

        release_all(storage, &mut state.footprints, player, true)?;
        info!("Player {} left quest '{}'", player, self.quest_tag);
        Ok(())
    }

    /// Put the player on `new_root`. Moving to the current root restarts
    /// the chain from scratch.
    pub fn move_player(
        &mut self,
        storage: &mut NodeStorage,
        player: &PlayerId,
        new_root: NodeId,
    ) -> Result<(), GraphError> {
        let state = self
            .players
            .get_mut(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;

        if state.cursor.is_valid() && state.cursor.root == new_root {
            return reset_chain(storage, state, player);
        }

        switch_chain(storage, state, player, new_root)?;
        info!(
            "Player {} moved to root {} on quest '{}'",
            player, new_root, self.quest_tag
        );
        Ok(())
    }

    /// Overwrite the result code a snapshot will carry
    pub fn record_result(
        &mut self,
        player: &PlayerId,
        result: EvalResult,
    ) -> Result<(), GraphError> {
        let state = self
            .players
            .get_mut(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;
        state.last_result = Some(result);
        Ok(())
    }

    /// Apply an evaluation outcome to the player's structural state
    pub fn apply_outcome(
        &mut self,
        storage: &mut NodeStorage,
        outcome: &EvaluationOutcome,
        player: &PlayerId,
    ) -> Result<(), GraphError> {
        let state = self
            .players
            .get_mut(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;

        if outcome.result == EvalResult::Error {
            state.last_result = Some(EvalResult::Error);
            return Ok(());
        }

        for &id in &outcome.visited {
            let lease = storage.increment(id)?;
            if let Some(node) = storage.node_mut(id) {
                node.enter(player);
            }
            state.footprints.push(lease);
        }

        let old = outcome.old_cursor;
        match outcome.result {
            EvalResult::Success if outcome.new_cursor.root == old.root => {
                reset_chain(storage, state, player)?;
            }
            EvalResult::Success => {
                state.completed_chains.push(old);
                switch_chain(storage, state, player, outcome.new_cursor.root)?;
                info!(
                    "Player {} finished chain {} on quest '{}', now at root {}",
                    player, old, self.quest_tag, outcome.new_cursor.root
                );
            }
            EvalResult::Failure => {
                unwind(storage, &mut state.footprints, player, 1, true)?;
                state.cursor = Cursor::at_root(old.root);
            }
            EvalResult::Rollback => {
                // Decrement only: rolled-back nodes keep their per-player progress
                let checkpoint = outcome.new_cursor.node;
                let keep = state
                    .footprints
                    .iter()
                    .rposition(|lease| lease.id() == checkpoint)
                    .map_or(1, |index| index + 1);
                unwind(storage, &mut state.footprints, player, keep, false)?;
                let top = state.footprints.last().map(NodeLease::id).unwrap_or(old.root);
                if top != checkpoint {
                    warn!(
                        "Player {} rollback checkpoint {} not among footprints on quest '{}'",
                        player, checkpoint, self.quest_tag
                    );
                }
                state.cursor = Cursor::new(old.root, top);
            }
            EvalResult::Suspend => {
                state.cursor = outcome.new_cursor;
            }
            EvalResult::Complete => {
                state.completed_chains.push(old);
                if self
                    .completed_tx
                    .send(QuestCompleted::new(&self.quest_tag, player))
                    .is_err()
                {
                    debug!("No listeners for completion of quest '{}'", self.quest_tag);
                }
                release_all(storage, &mut state.footprints, player, true)?;
                state.cursor = Cursor::NONE;
                info!("Player {} completed quest '{}'", player, self.quest_tag);
            }
            EvalResult::Error => {}
        }

        state.last_result = Some(outcome.result);
        Ok(())
    }

    /// Where a failure should roll back to: the topmost rollback point below
    /// the current node, or the chain root
    pub fn resume_checkpoint(&self, storage: &NodeStorage, player: &PlayerId) -> Option<Cursor> {
        let state = self.players.get(player)?;
        let root = state.cursor.root;
        let below_top = state.footprints.len().saturating_sub(1);

        let checkpoint = state.footprints[..below_top]
            .iter()
            .rev()
            .map(NodeLease::id)
            .find(|id| storage.node(*id).is_some_and(|node| node.is_rollback_point()))
            .map(|id| Cursor::new(root, id))
            .unwrap_or(Cursor::at_root(root));
        Some(checkpoint)
    }

    /// Serialize a player's state
    pub fn snapshot(&self, player: &PlayerId) -> Result<QuestSnapshot, GraphError> {
        let state = self
            .players
            .get(player)
            .ok_or_else(|| GraphError::UnknownPlayer(player.clone()))?;

        Ok(QuestSnapshot {
            completed_chains: state.completed_chains.clone(),
            footprints: state.footprint_ids(),
            last_result: state.last_result,
        })
    }
}

/// Load and reference a root node
fn acquire_root(storage: &mut NodeStorage, root: NodeId) -> Result<NodeLease, GraphError> {
    let node = storage
        .get_or_create_node(Cursor::at_root(root))?
        .ok_or(GraphError::NodeUnavailable(root))?;
    if !node.is_root() {
        return Err(GraphError::NotARoot(root));
    }
    storage.increment(root)
}

fn acquire_node(storage: &mut NodeStorage, cursor: Cursor) -> Result<NodeLease, GraphError> {
    if storage.get_or_create_node(cursor)?.is_none() {
        return Err(GraphError::NodeUnavailable(cursor.node));
    }
    storage.increment(cursor.node)
}

/// Pop footprints until `keep` remain, optionally resetting each node
fn unwind(
    storage: &mut NodeStorage,
    footprints: &mut Vec<NodeLease>,
    player: &PlayerId,
    keep: usize,
    reset: bool,
) -> Result<(), GraphError> {
    while footprints.len() > keep {
        let Some(lease) = footprints.pop() else {
            break;
        };
        if reset {
            if let Some(node) = storage.node_mut(lease.id()) {
                node.reset(player);
            }
        }
        storage.decrement(lease)?;
    }
    Ok(())
}

fn release_all(
    storage: &mut NodeStorage,
    footprints: &mut Vec<NodeLease>,
    player: &PlayerId,
    reset: bool,
) -> Result<(), GraphError> {
    unwind(storage, footprints, player, 0, reset)
}

/// Clean-slate restart of the current chain
fn reset_chain(
    storage: &mut NodeStorage,
    state: &mut PlayerState,
    player: &PlayerId,
) -> Result<(), GraphError> {
    unwind(storage, &mut state.footprints, player, 1, true)?;
    let root = state.cursor.root;
    if let Some(node) = storage.node_mut(root) {
        node.reset(player);
        node.enter(player);
    }
    state.cursor = Cursor::at_root(root);
    Ok(())
}

/// Drop the current chain and stand on `new_root` alone
fn switch_chain(
    storage: &mut NodeStorage,
    state: &mut PlayerState,
    player: &PlayerId,
    new_root: NodeId,
) -> Result<(), GraphError> {
    let lease = acquire_root(storage, new_root)?;
    release_all(storage, &mut state.footprints, player, true)?;
    state.footprints.push(lease);
    if let Some(node) = storage.node_mut(new_root) {
        node.enter(player);
    }
    state.cursor = Cursor::at_root(new_root);
    Ok(())
}
