//! taskstack - A task orchestration engine
//!
//! Tasks are shell commands, functions or nested serial and concurrent
//! lists of other tasks, registered by name into namespaces. A task file
//! (`taskstack.yml`) or a `package.json` can declare them, and the
//! [`Orchestrator`] runs any of them with a single queue of work.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod registry;
pub mod runner;
pub mod task;

// Re-export commonly used types
pub use error::{Failure, Result, TaskError, TaskResult, TaskStackError};
pub use registry::Registry;
pub use runner::{Event, Observer, Orchestrator, OrchestratorConfig, StopOnError, TaskContext};
pub use task::{
    concurrent, env, exec, serial, ArgOption, OptionType, ShellFlags, TaskFn, TaskObject,
    TaskValue,
};

/// Current version of taskstack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
