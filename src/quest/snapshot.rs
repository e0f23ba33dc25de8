//! Player Snapshots
//!
//! Flat integer encoding of a player's state on one graph, suitable for any
//! external store:
//!
//! ```text
//! [footprint_start, root0, node0, root1, node1, ..., footprint ids..., last_result]
//! ```
//!
//! `footprint_start` is the index of the first footprint id. The last value
//! is the result code of the player's most recent evaluation (0 for none).

use serde::{Deserialize, Serialize};

use super::cursor::{Cursor, NodeId};
use super::error::GraphError;
use super::runtime::EvalResult;

const NO_RESULT: i32 = 0;

/// Captured player state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct QuestSnapshot {
    pub completed_chains: Vec<Cursor>,
    /// Footprint ids, root first
    pub footprints: Vec<NodeId>,
    pub last_result: Option<EvalResult>,
}

impl QuestSnapshot {
    /// Cursor implied by the footprints: bottom is the root, top the node
    pub fn cursor(&self) -> Cursor {
        match (self.footprints.first(), self.footprints.last()) {
            (Some(&root), Some(&node)) => Cursor::new(root, node),
            _ => Cursor::NONE,
        }
    }

    pub fn encode(&self) -> Vec<i32> {
        let footprint_start = 1 + 2 * self.completed_chains.len();
        let mut values = Vec::with_capacity(footprint_start + self.footprints.len() + 1);

        values.push(footprint_start as i32);
        for chain in &self.completed_chains {
            values.push(chain.root);
            values.push(chain.node);
        }
        values.extend_from_slice(&self.footprints);
        values.push(self.last_result.map_or(NO_RESULT, EvalResult::code));
        values
    }

    pub fn decode(values: &[i32]) -> Result<Self, GraphError> {
        if values.len() < 2 {
            return Err(GraphError::MalformedSnapshot(format!(
                "expected at least 2 values, got {}",
                values.len()
            )));
        }

        let last = values.len() - 1;
        let footprint_start = usize::try_from(values[0]).map_err(|_| {
            GraphError::MalformedSnapshot(format!("negative footprint index {}", values[0]))
        })?;
        if footprint_start == 0 || footprint_start > last || (footprint_start - 1) % 2 != 0 {
            return Err(GraphError::MalformedSnapshot(format!(
                "footprint index {} does not fit {} values",
                footprint_start,
                values.len()
            )));
        }

        let completed_chains: Vec<Cursor> = values[1..footprint_start]
            .chunks_exact(2)
            .map(|pair| Cursor::new(pair[0], pair[1]))
            .collect();
        if let Some(chain) = completed_chains.iter().find(|chain| !chain.is_valid()) {
            return Err(GraphError::MalformedSnapshot(format!(
                "invalid completed chain {:?}",
                chain
            )));
        }

        let footprints = values[footprint_start..last].to_vec();
        if let Some(id) = footprints.iter().find(|id| **id < 0) {
            return Err(GraphError::MalformedSnapshot(format!(
                "invalid footprint id {}",
                id
            )));
        }

        let code = values[last];
        let last_result = if code == NO_RESULT {
            None
        } else {
            Some(EvalResult::from_code(code).ok_or_else(|| {
                GraphError::MalformedSnapshot(format!("unknown result code {}", code))
            })?)
        };

        Ok(Self {
            completed_chains,
            footprints,
            last_result,
        })
    }
}

impl QuestSnapshot {
    /// JSON array form, e.g. `[5,0,0,4,6,10,11,13,4]`
    pub fn to_json(&self) -> String {
        let values = self.encode();
        serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let values: Vec<i32> = serde_json::from_str(json)
            .map_err(|e| GraphError::MalformedSnapshot(e.to_string()))?;
        Self::decode(&values)
    }
}

impl TryFrom<Vec<i32>> for QuestSnapshot {
    type Error = GraphError;

    fn try_from(values: Vec<i32>) -> Result<Self, Self::Error> {
        Self::decode(&values)
    }
}

impl From<QuestSnapshot> for Vec<i32> {
    fn from(snapshot: QuestSnapshot) -> Self {
        snapshot.encode()
    }
}
