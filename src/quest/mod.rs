//! Quest Graph Engine
//!
//! Moves players through a quest's graph of content nodes. Nodes are loaded
//! lazily, shared between players and reference-counted; each player holds a
//! stack of footprints on the chain it is walking.

pub mod cursor;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod player;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod storage;

pub use cursor::{Cursor, NodeId};
pub use error::GraphError;
pub use events::{QuestCompleted, QuestEvent, ReevaluateSignal, ReevaluationRequest};
pub use graph::{EvaluationPolicy, QuestGraph};
pub use node::{NextNode, NodeLoader, QuestNode};
pub use player::PlayerId;
pub use runtime::{ChainRuntime, EvalResult, EvaluationOutcome, MAX_CHAIN_LENGTH};
pub use session::{PlayerState, Session};
pub use snapshot::QuestSnapshot;
pub use storage::{NodeLease, NodeStorage};
