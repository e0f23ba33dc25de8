//! Quest graph engine: per-player progression through lazily loaded,
//! reference-counted quest node chains, plus the data-driven packs and the
//! dispatcher task that serve them.

pub mod config;
pub mod dispatcher;
pub mod pack;
pub mod quest;
pub mod testing;

pub use config::ServerConfig;
pub use dispatcher::{spawn_dispatcher, DispatchError, DispatcherHandle};
pub use pack::QuestPackRegistry;
pub use quest::{EvaluationPolicy, PlayerId, QuestGraph};
