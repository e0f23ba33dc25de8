//! Quest Pack Definitions
//!
//! These structures are deserialized from TOML quest pack files and resolved
//! into the node definitions the loader hands to a quest graph.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::quest::{NextNode, NodeId, QuestEvent};

/// A quest pack file as it appears on disk
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestPackFile {
    pub quest: RawQuestPack,
}

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestPack {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Root new players start on (defaults to the lowest-id root)
    pub start: Option<NodeId>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

/// Raw node as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub id: NodeId,
    /// Successor id, -1 to suspend, -2 to complete
    #[serde(default = "default_next")]
    pub next: i32,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub rollback: bool,
    /// Fail instead of waiting while the objective is incomplete
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub description: String,
    pub objective: Option<RawObjective>,
}

fn default_next() -> i32 {
    NextNode::SUSPEND
}

/// Raw objective as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawObjective {
    #[serde(rename = "type")]
    pub objective_type: String,
    pub target: String,
    #[serde(default = "default_count")]
    pub count: i32,
}

fn default_count() -> i32 {
    1
}

// ============================================================================
// Resolved Pack Structures (after parsing)
// ============================================================================

/// Objective types a node can track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveType {
    /// Kill X monsters of type Y
    KillMonster,
    /// Collect X items of type Y
    CollectItem,
    /// Talk to a specific NPC
    TalkTo,
    /// Reach a specific location
    ReachLocation,
}

impl ObjectiveType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kill_monster" | "kill" => Some(ObjectiveType::KillMonster),
            "collect_item" | "collect" => Some(ObjectiveType::CollectItem),
            "talk_to" | "talk" => Some(ObjectiveType::TalkTo),
            "reach_location" | "reach" | "location" => Some(ObjectiveType::ReachLocation),
            _ => None,
        }
    }
}

/// A resolved node objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Objective {
    pub objective_type: ObjectiveType,
    /// Target entity/item/npc/location ID
    pub target: String,
    /// Number required (1 for talk_to, reach_location)
    pub count: i32,
}

impl Objective {
    pub fn from_raw(raw: &RawObjective) -> Option<Self> {
        let objective_type = ObjectiveType::from_str(&raw.objective_type)?;
        Some(Self {
            objective_type,
            target: raw.target.clone(),
            count: raw.count.max(0),
        })
    }

    /// Progress this event contributes, if it concerns this objective
    pub fn progress_from(&self, event: &QuestEvent) -> Option<i32> {
        match (self.objective_type, event) {
            (ObjectiveType::KillMonster, QuestEvent::MonsterKilled { entity_type, .. })
                if *entity_type == self.target =>
            {
                Some(1)
            }
            (ObjectiveType::CollectItem, QuestEvent::ItemCollected { item_id, count })
                if *item_id == self.target =>
            {
                Some(*count)
            }
            (ObjectiveType::TalkTo, QuestEvent::NpcInteraction { npc_id })
                if *npc_id == self.target =>
            {
                Some(self.count)
            }
            (ObjectiveType::ReachLocation, QuestEvent::LocationReached { location_id, .. })
                if *location_id == self.target =>
            {
                Some(self.count)
            }
            _ => None,
        }
    }
}

/// A resolved node definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub next: NextNode,
    pub is_root: bool,
    pub rollback: bool,
    pub strict: bool,
    pub description: String,
    pub objective: Option<Objective>,
}

impl NodeDefinition {
    pub fn from_raw(raw: &RawNode) -> Result<Self, String> {
        if raw.id < 0 {
            return Err(format!("Node id {} is negative", raw.id));
        }

        let next = NextNode::from_raw(raw.next)
            .ok_or_else(|| format!("Node {} has invalid next {}", raw.id, raw.next))?;

        let objective = match &raw.objective {
            Some(objective) => Some(Objective::from_raw(objective).ok_or_else(|| {
                format!(
                    "Invalid objective type '{}' on node {}",
                    objective.objective_type, raw.id
                )
            })?),
            None => None,
        };

        Ok(Self {
            id: raw.id,
            next,
            is_root: raw.root,
            rollback: raw.rollback,
            strict: raw.strict,
            description: raw.description.clone(),
            objective,
        })
    }
}

/// A fully resolved quest pack
#[derive(Debug, Clone)]
pub struct QuestPack {
    pub tag: String,
    pub name: String,
    pub description: String,
    /// Root new players are placed on
    pub start: NodeId,
    nodes: HashMap<NodeId, NodeDefinition>,
}

impl QuestPack {
    /// Create a pack from raw TOML data
    pub fn from_raw(raw: &RawQuestPack) -> Result<Self, String> {
        let mut nodes = HashMap::new();
        for raw_node in &raw.nodes {
            let node = NodeDefinition::from_raw(raw_node)
                .map_err(|e| format!("Quest '{}': {}", raw.tag, e))?;
            if nodes.insert(node.id, node).is_some() {
                return Err(format!("Quest '{}' defines node {} twice", raw.tag, raw_node.id));
            }
        }

        let ids: HashSet<NodeId> = nodes.keys().copied().collect();
        for node in nodes.values() {
            if let NextNode::Node(next) = node.next {
                if !ids.contains(&next) {
                    return Err(format!(
                        "Quest '{}': node {} points at missing node {}",
                        raw.tag, node.id, next
                    ));
                }
            }
        }

        let start = match raw.start {
            Some(start) => {
                match nodes.get(&start) {
                    Some(node) if node.is_root => start,
                    Some(_) => {
                        return Err(format!(
                            "Quest '{}': start node {} is not a root",
                            raw.tag, start
                        ));
                    }
                    None => {
                        return Err(format!(
                            "Quest '{}': start node {} does not exist",
                            raw.tag, start
                        ));
                    }
                }
            }
            None => nodes
                .values()
                .filter(|node| node.is_root)
                .map(|node| node.id)
                .min()
                .ok_or_else(|| format!("Quest '{}' has no root node", raw.tag))?,
        };

        Ok(Self {
            tag: raw.tag.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            start,
            nodes,
        })
    }

    /// Get a node definition by ID
    pub fn node(&self, id: NodeId) -> Option<&NodeDefinition> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_ids(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.is_root)
            .map(|node| node.id)
            .collect();
        roots.sort_unstable();
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<QuestPack, String> {
        let raw: RawQuestPackFile = toml::from_str(toml_src).map_err(|e| e.to_string())?;
        QuestPack::from_raw(&raw.quest)
    }

    const FIRST_HUNT: &str = r#"
[quest]
tag = "first_hunt"
name = "First Hunt"

[[quest.nodes]]
id = 0
root = true
next = 1
description = "Talk to the elder"

[[quest.nodes]]
id = 1
next = 2
rollback = true
[quest.nodes.objective]
type = "kill_monster"
target = "slime"
count = 3

[[quest.nodes]]
id = 2
root = true
next = -2
"#;

    #[test]
    fn test_objective_type_parsing() {
        assert_eq!(ObjectiveType::from_str("kill_monster"), Some(ObjectiveType::KillMonster));
        assert_eq!(ObjectiveType::from_str("collect_item"), Some(ObjectiveType::CollectItem));
        assert_eq!(ObjectiveType::from_str("talk_to"), Some(ObjectiveType::TalkTo));
        assert_eq!(ObjectiveType::from_str("reach_location"), Some(ObjectiveType::ReachLocation));
        assert_eq!(ObjectiveType::from_str("invalid"), None);
    }

    #[test]
    fn test_parse_pack() {
        let pack = parse(FIRST_HUNT).unwrap();
        assert_eq!(pack.tag, "first_hunt");
        assert_eq!(pack.start, 0);
        assert_eq!(pack.node_count(), 3);
        assert_eq!(pack.root_ids(), vec![0, 2]);

        let hunt = pack.node(1).unwrap();
        assert_eq!(hunt.next, NextNode::Node(2));
        assert!(hunt.rollback);
        assert!(!hunt.strict);
        let objective = hunt.objective.as_ref().unwrap();
        assert_eq!(objective.objective_type, ObjectiveType::KillMonster);
        assert_eq!(objective.count, 3);

        assert_eq!(pack.node(2).unwrap().next, NextNode::Complete);
        // Unset next means "suspend here"
        let raw: RawNode = toml::from_str("id = 4").unwrap();
        assert_eq!(NodeDefinition::from_raw(&raw).unwrap().next, NextNode::Suspend);
    }

    #[test]
    fn test_invalid_packs() {
        let dangling = FIRST_HUNT.replace("next = 2", "next = 9");
        assert!(parse(&dangling).unwrap_err().contains("missing node 9"));

        let duplicate = FIRST_HUNT.replace("id = 2", "id = 1");
        assert!(parse(&duplicate).unwrap_err().contains("twice"));

        let bad_start = FIRST_HUNT.replace("name = \"First Hunt\"", "name = \"x\"\nstart = 1");
        assert!(parse(&bad_start).unwrap_err().contains("not a root"));

        let bad_type = FIRST_HUNT.replace("kill_monster", "dance");
        assert!(parse(&bad_type).unwrap_err().contains("Invalid objective type"));

        let bad_next = FIRST_HUNT.replace("next = -2", "next = -7");
        assert!(parse(&bad_next).unwrap_err().contains("invalid next"));

        let rootless = FIRST_HUNT.replace("root = true", "root = false");
        assert!(parse(&rootless).unwrap_err().contains("no root"));
    }

    #[test]
    fn test_objective_matching() {
        let objective = Objective {
            objective_type: ObjectiveType::CollectItem,
            target: "slime_core".to_string(),
            count: 5,
        };

        let matching = QuestEvent::ItemCollected {
            item_id: "slime_core".to_string(),
            count: 2,
        };
        let other_item = QuestEvent::ItemCollected {
            item_id: "bone".to_string(),
            count: 2,
        };
        let other_kind = QuestEvent::NpcInteraction {
            npc_id: "slime_core".to_string(),
        };

        assert_eq!(objective.progress_from(&matching), Some(2));
        assert_eq!(objective.progress_from(&other_item), None);
        assert_eq!(objective.progress_from(&other_kind), None);
    }
}
