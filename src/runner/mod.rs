//! Task execution engine
//!
//! The [`Orchestrator`] owns the registry and the execution tree. Each run
//! is driven by one or more executors, stack machines that resolve task
//! names and dispatch the values they resolve to.

pub mod context;
pub mod env;
pub mod events;
pub(crate) mod executor;
pub mod orchestrator;
pub mod queue;
pub mod shell;
pub mod suggest;
pub mod tree;

pub use context::{MarkCallback, TaskContext};
pub use env::{update_env, EnvTarget, ProcessEnv};
pub use events::{Event, EventBus, ExecuteKind, ItemInfo, Observer, ObserverError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StopOnError};
pub use queue::{ItemId, ItemKind, NewItem, Origin, QueueItem, Resolution, Stage};
pub use shell::ChildRegistry;
pub use suggest::similar_names;
pub use tree::TaskTree;
