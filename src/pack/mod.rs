//! Quest Packs
//!
//! Data-driven quest content: TOML pack files, the objective nodes built from
//! them, and the registry that serves those nodes to quest graphs.

pub mod definition;
pub mod objective;
pub mod registry;

pub use definition::{NodeDefinition, Objective, ObjectiveType, QuestPack, RawQuestPackFile};
pub use objective::{ObjectiveNode, ObjectiveProgress};
pub use registry::{HotReloadEvent, QuestPackRegistry};
