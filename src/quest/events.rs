//! Quest Event Types
//!
//! Gameplay events forwarded to quest nodes, the quest-completed
//! broadcast, and the queued "re-evaluate me" requests nodes raise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::cursor::NodeId;
use super::player::PlayerId;

/// Events that can move a node's per-player progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuestEvent {
    /// Player killed a monster
    MonsterKilled {
        /// Entity prototype ID (e.g., "pig", "elder_villager")
        entity_type: String,
        /// Level of the killed monster
        level: i32,
    },

    /// Player collected an item
    ItemCollected {
        /// Item ID (e.g., "slime_core", "health_potion")
        item_id: String,
        /// Quantity collected
        count: i32,
    },

    /// Player talked to an NPC
    NpcInteraction {
        /// NPC entity prototype ID
        npc_id: String,
    },

    /// Player reached a location
    LocationReached {
        /// Location identifier
        location_id: String,
        /// World coordinates
        x: i32,
        y: i32,
    },
}

impl QuestEvent {
    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            QuestEvent::MonsterKilled { .. } => "monster_killed",
            QuestEvent::ItemCollected { .. } => "item_collected",
            QuestEvent::NpcInteraction { .. } => "npc_interaction",
            QuestEvent::LocationReached { .. } => "location_reached",
        }
    }
}

/// Broadcast once per chain that reaches the complete sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestCompleted {
    pub quest_tag: String,
    pub player: PlayerId,
    pub completed_at: DateTime<Utc>,
}

impl QuestCompleted {
    pub fn new(quest_tag: &str, player: &PlayerId) -> Self {
        Self {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// A node asking to be evaluated again for a player
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReevaluationRequest {
    pub node_id: NodeId,
    pub player: PlayerId,
}

/// Handle given to a loaded node so it can queue a re-evaluation.
///
/// Requests are only consumed on the next external tick; raising one never
/// re-enters the graph.
#[derive(Debug, Clone)]
pub struct ReevaluateSignal {
    node_id: NodeId,
    tx: mpsc::UnboundedSender<ReevaluationRequest>,
}

impl ReevaluateSignal {
    pub fn new(node_id: NodeId, tx: mpsc::UnboundedSender<ReevaluationRequest>) -> Self {
        Self { node_id, tx }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Queue a re-evaluation of this node for `player`
    pub fn request(&self, player: &PlayerId) {
        let request = ReevaluationRequest {
            node_id: self.node_id,
            player: player.clone(),
        };
        if self.tx.send(request).is_err() {
            debug!(
                "Dropped re-evaluation request from node {} for player {}: graph is gone",
                self.node_id, player
            );
        }
    }
}
