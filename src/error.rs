//! Error types for taskstack

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for taskstack operations
pub type Result<T> = std::result::Result<T, TaskStackError>;

/// Main error type for taskstack
#[derive(Error, Debug)]
pub enum TaskStackError {
    /// Task file and manifest errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised while building or running tasks
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Namespace registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Aggregated run failure
    #[error("Execution failed: {0}")]
    Failed(#[from] Failure),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors attributed to a single queue item while it executes.
///
/// These are cloneable so a run failure can be returned to every
/// caller that awaits the same orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task {name} not found")]
    NotFound { name: String },

    #[error("Task {name} in namespace {namespace} not found")]
    NotFoundInNamespace { name: String, namespace: String },

    #[error("No task namespace {0} exist")]
    NamespaceNotFound(String),

    #[error("Invalid empty task name")]
    InvalidName,

    #[error("Unable to process task {name} because value type {shape} is unknown")]
    UnknownTaskShape { name: String, shape: String },

    #[error("cmd \"{cmd}\" exit code {}", display_code(.code))]
    ShellExitNonZero { cmd: String, code: Option<i32> },

    #[error("cmd \"{cmd}\" timed out after {}ms", .timeout.as_millis())]
    ShellTimeout { cmd: String, timeout: Duration },

    #[error("Failed to spawn cmd \"{cmd}\": {reason}")]
    Spawn { cmd: String, reason: String },

    #[error("Unknown flag {flag} in shell task: {task}")]
    UnknownFlag { flag: String, task: String },

    #[error("Missing )$ in shell task: {0}")]
    MissingFlagClose(String),

    #[error("Unknown options for task {task}: {}", .options.join(", "))]
    UnknownOptions { task: String, options: Vec<String> },

    #[error("Option '{option}' is required by task {task}")]
    MissingOption { task: String, option: String },

    #[error("Invalid value for option '{option}' of task {task}: {reason}")]
    InvalidOption {
        task: String,
        option: String,
        reason: String,
    },

    #[error("Invalid task array: {0}")]
    InvalidArray(String),

    /// Error returned by a task function
    #[error("{0}")]
    Function(String),

    #[error("task function {name} panicked: {message}")]
    FunctionPanic { name: String, message: String },

    /// Error item yielded by a stream task
    #[error("{0}")]
    Stream(String),

    #[error("event listener failed: {0}")]
    Listener(String),

    #[error("concurrent task {0} aborted")]
    Aborted(String),
}

impl TaskError {
    /// Build a task function error from any displayable message
    pub fn msg(message: impl fmt::Display) -> Self {
        TaskError::Function(message.to_string())
    }

    /// The task name when this error reports an unregistered task
    pub fn missing_task(&self) -> Option<&str> {
        match self {
            TaskError::NotFound { name } | TaskError::NotFoundInNamespace { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// True for the lookup failures a `?` prefix turns into a soft miss
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TaskError::NotFound { .. }
                | TaskError::NotFoundInNamespace { .. }
                | TaskError::NamespaceNotFound(_)
        )
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "null".to_string(),
    }
}

/// Namespace registration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("circular namespace override between '{0}' and '{1}'")]
    CircularOverride(String, String),

    #[error("calculating namespace order looped too many times, there may be circular overrides")]
    OverrideLoop,

    #[error("Invalid task name '{0}': names cannot contain '/' or start with '?'")]
    InvalidTaskName(String),
}

/// Task file parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find task file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Task '{task}' has an invalid definition: {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },

    #[error("Failed to read package manifest '{path}': {error}")]
    Manifest { path: PathBuf, error: String },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Aggregated failure of a run.
///
/// The first recorded error is the primary one; everything recorded
/// after it is kept in order as additional context.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    errors: Vec<TaskError>,
}

impl Failure {
    pub fn new(first: TaskError) -> Self {
        Failure {
            errors: vec![first],
        }
    }

    pub(crate) fn push(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    /// The first error recorded for the run
    pub fn primary(&self) -> &TaskError {
        &self.errors[0]
    }

    /// Message of the primary error
    pub fn message(&self) -> String {
        self.primary().to_string()
    }

    /// Messages of every error after the primary one, in record order
    pub fn more(&self) -> Vec<String> {
        self.errors[1..].iter().map(ToString::to_string).collect()
    }

    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary())
    }
}

impl std::error::Error for Failure {}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for task operations
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Specialized result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_first_error_primary() {
        let mut failure = Failure::new(TaskError::msg("a failed"));
        failure.push(TaskError::msg("b failed"));
        failure.push(TaskError::ShellExitNonZero {
            cmd: "false".to_string(),
            code: Some(1),
        });

        assert_eq!(failure.message(), "a failed");
        assert_eq!(
            failure.more(),
            vec!["b failed".to_string(), "cmd \"false\" exit code 1".to_string()]
        );
        assert_eq!(failure.to_string(), "a failed");
    }

    #[test]
    fn test_not_found_messages() {
        let err = TaskError::NotFound {
            name: "foo".to_string(),
        };
        assert_eq!(err.to_string(), "Task foo not found");
        assert_eq!(err.missing_task(), Some("foo"));

        let err = TaskError::NotFoundInNamespace {
            name: "bar".to_string(),
            namespace: "/".to_string(),
        };
        assert_eq!(err.to_string(), "Task bar in namespace / not found");

        let err = TaskError::NamespaceNotFound("foo".to_string());
        assert_eq!(err.to_string(), "No task namespace foo exist");
        assert!(err.is_not_found());
        assert_eq!(err.missing_task(), None);
    }

    #[test]
    fn test_unknown_options_message() {
        let err = TaskError::UnknownOptions {
            task: "foo".to_string(),
            options: vec!["a".to_string(), "bar".to_string()],
        };
        assert_eq!(err.to_string(), "Unknown options for task foo: a, bar");
    }

    #[test]
    fn test_exit_code_without_code() {
        let err = TaskError::ShellExitNonZero {
            cmd: "kill -9 $$".to_string(),
            code: None,
        };
        assert_eq!(err.to_string(), "cmd \"kill -9 $$\" exit code null");
    }
}
