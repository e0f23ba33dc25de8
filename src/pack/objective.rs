//! Objective Nodes
//!
//! The quest node built from a pack definition. Tracks objective progress per
//! player and asks the graph to re-evaluate once a player finishes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::definition::NodeDefinition;
use crate::quest::{NextNode, NodeId, PlayerId, QuestEvent, QuestNode, ReevaluateSignal};

/// Progress on a single objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub current: i32,
    pub target: i32,
    pub completed: bool,
}

impl ObjectiveProgress {
    pub fn new(target: i32) -> Self {
        Self {
            current: 0,
            target,
            completed: target <= 0,
        }
    }

    /// Add progress and return true if newly completed. Progress never
    /// goes down.
    pub fn add_progress(&mut self, amount: i32) -> bool {
        if self.completed || amount <= 0 {
            return false;
        }
        self.current = self.current.saturating_add(amount).min(self.target);
        if self.current >= self.target {
            self.completed = true;
            true
        } else {
            false
        }
    }

    pub fn progress_percent(&self) -> f32 {
        if self.target == 0 {
            return 1.0;
        }
        self.current as f32 / self.target as f32
    }
}

/// A node loaded from a quest pack
pub struct ObjectiveNode {
    quest_tag: String,
    definition: NodeDefinition,
    progress: HashMap<PlayerId, ObjectiveProgress>,
    signal: Option<ReevaluateSignal>,
}

impl ObjectiveNode {
    pub fn new(quest_tag: &str, definition: NodeDefinition) -> Self {
        Self {
            quest_tag: quest_tag.to_string(),
            definition,
            progress: HashMap::new(),
            signal: None,
        }
    }

    pub fn definition(&self) -> &NodeDefinition {
        &self.definition
    }

    pub fn progress(&self, player: &PlayerId) -> Option<&ObjectiveProgress> {
        self.progress.get(player)
    }

    /// Players this node currently tracks
    pub fn tracked_players(&self) -> usize {
        self.progress.len()
    }

    fn is_done(&self, player: &PlayerId) -> bool {
        match (&self.definition.objective, self.progress.get(player)) {
            (None, _) => true,
            (Some(_), Some(progress)) => progress.completed,
            (Some(objective), None) => objective.count <= 0,
        }
    }
}

impl QuestNode for ObjectiveNode {
    fn id(&self) -> NodeId {
        self.definition.id
    }

    fn next_id(&self, player: &PlayerId) -> NextNode {
        if self.is_done(player) {
            self.definition.next
        } else {
            NextNode::Suspend
        }
    }

    fn is_root(&self) -> bool {
        self.definition.is_root
    }

    fn is_rollback_point(&self) -> bool {
        self.definition.rollback
    }

    fn evaluate(&mut self, player: &PlayerId) -> bool {
        // First arrival always passes; strict nodes fail later while unfinished
        !(self.definition.strict && self.progress.contains_key(player) && !self.is_done(player))
    }

    fn enter(&mut self, player: &PlayerId) {
        let target = self
            .definition
            .objective
            .as_ref()
            .map_or(0, |objective| objective.count);
        self.progress
            .entry(player.clone())
            .or_insert_with(|| ObjectiveProgress::new(target));
    }

    fn reset(&mut self, player: &PlayerId) {
        self.progress.remove(player);
    }

    fn dispose(&mut self) {
        self.progress.clear();
        self.signal = None;
    }

    fn subscribe(&mut self, signal: ReevaluateSignal) {
        self.signal = Some(signal);
    }

    fn unsubscribe(&mut self) {
        self.signal = None;
    }

    fn handle_event(&mut self, player: &PlayerId, event: &QuestEvent) {
        let Some(objective) = &self.definition.objective else {
            return;
        };
        let Some(amount) = objective.progress_from(event) else {
            return;
        };
        let Some(progress) = self.progress.get_mut(player) else {
            return;
        };

        if progress.add_progress(amount) {
            debug!(
                "Quest '{}': player {} finished objective of node {} ({})",
                self.quest_tag,
                player,
                self.definition.id,
                event.event_type()
            );
            if let Some(signal) = &self.signal {
                signal.request(player);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::definition::{Objective, ObjectiveType};
    use tokio::sync::mpsc;

    fn slime_hunt(strict: bool) -> ObjectiveNode {
        ObjectiveNode::new(
            "first_hunt",
            NodeDefinition {
                id: 1,
                next: NextNode::Node(2),
                is_root: false,
                rollback: false,
                strict,
                description: "Kill 3 slimes".to_string(),
                objective: Some(Objective {
                    objective_type: ObjectiveType::KillMonster,
                    target: "slime".to_string(),
                    count: 3,
                }),
            },
        )
    }

    fn slime_kill() -> QuestEvent {
        QuestEvent::MonsterKilled {
            entity_type: "slime".to_string(),
            level: 1,
        }
    }

    #[test]
    fn test_progress_saturates_and_ignores_negative_counts() {
        let mut obj = ObjectiveProgress::new(i32::MAX);

        assert!(!obj.add_progress(5));
        assert!(!obj.add_progress(-3));
        assert!(!obj.add_progress(0));
        assert_eq!(obj.current, 5);

        assert!(obj.add_progress(i32::MAX));
        assert_eq!(obj.current, i32::MAX);
        assert!(obj.completed);
    }

    #[test]
    fn test_objective_progress() {
        let mut obj = ObjectiveProgress::new(5);
        assert!(!obj.completed);

        assert!(!obj.add_progress(3));
        assert_eq!(obj.current, 3);

        assert!(obj.add_progress(4));
        assert!(obj.completed);
        assert_eq!(obj.current, 5);

        // Can't add more after complete
        assert!(!obj.add_progress(1));
        assert_eq!(obj.progress_percent(), 1.0);

        assert!(ObjectiveProgress::new(0).completed);
    }

    #[test]
    fn test_huge_item_counts_complete_without_overflow() {
        let mut node = ObjectiveNode::new(
            "hoarder",
            NodeDefinition {
                id: 4,
                next: NextNode::Node(5),
                is_root: false,
                rollback: false,
                strict: false,
                description: "Collect every coin".to_string(),
                objective: Some(Objective {
                    objective_type: ObjectiveType::CollectItem,
                    target: "coin".to_string(),
                    count: i32::MAX,
                }),
            },
        );
        let alice = PlayerId::new("alice");
        let coins = |count| QuestEvent::ItemCollected {
            item_id: "coin".to_string(),
            count,
        };

        node.enter(&alice);
        node.handle_event(&alice, &coins(5));
        node.handle_event(&alice, &coins(-5));
        assert_eq!(node.progress(&alice).unwrap().current, 5);

        node.handle_event(&alice, &coins(i32::MAX));
        assert!(node.progress(&alice).unwrap().completed);
        assert_eq!(node.next_id(&alice), NextNode::Node(5));
    }

    #[test]
    fn test_suspends_until_objective_done() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut node = slime_hunt(false);
        node.subscribe(ReevaluateSignal::new(1, tx));
        let alice = PlayerId::new("alice");
        let bob = PlayerId::new("bob");

        assert!(node.evaluate(&alice));
        assert_eq!(node.next_id(&alice), NextNode::Suspend);

        node.enter(&alice);
        node.enter(&bob);
        node.handle_event(&alice, &slime_kill());
        node.handle_event(&alice, &slime_kill());
        assert!(rx.try_recv().is_err());

        node.handle_event(&alice, &slime_kill());
        let request = rx.try_recv().unwrap();
        assert_eq!(request.node_id, 1);
        assert_eq!(request.player, alice);

        assert_eq!(node.next_id(&alice), NextNode::Node(2));
        assert_eq!(node.next_id(&bob), NextNode::Suspend);

        // Further kills do not signal again
        node.handle_event(&alice, &slime_kill());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_events_ignored_for_strangers_and_other_targets() {
        let mut node = slime_hunt(false);
        let alice = PlayerId::new("alice");

        node.handle_event(&alice, &slime_kill());
        assert!(node.progress(&alice).is_none());

        node.enter(&alice);
        node.handle_event(
            &alice,
            &QuestEvent::MonsterKilled {
                entity_type: "wolf".to_string(),
                level: 3,
            },
        );
        assert_eq!(node.progress(&alice).unwrap().current, 0);
    }

    #[test]
    fn test_strict_node_fails_while_unfinished() {
        let mut node = slime_hunt(true);
        let alice = PlayerId::new("alice");

        assert!(node.evaluate(&alice));
        node.enter(&alice);
        assert!(!node.evaluate(&alice));

        for _ in 0..3 {
            node.handle_event(&alice, &slime_kill());
        }
        assert!(node.evaluate(&alice));
    }

    #[test]
    fn test_reset_and_dispose_drop_progress() {
        let mut node = slime_hunt(false);
        let alice = PlayerId::new("alice");
        let bob = PlayerId::new("bob");

        node.enter(&alice);
        node.enter(&bob);
        node.handle_event(&alice, &slime_kill());

        // Re-entering keeps what was already done
        node.enter(&alice);
        assert_eq!(node.progress(&alice).unwrap().current, 1);

        node.reset(&alice);
        assert!(node.progress(&alice).is_none());
        assert_eq!(node.tracked_players(), 1);

        node.dispose();
        assert_eq!(node.tracked_players(), 0);
    }
}
