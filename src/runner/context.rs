//! Context handed to task functions

use crate::runner::orchestrator::Orchestrator;
use crate::task::{ArgValue, ArgValues, TaskValue};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Called when a value queued with [`TaskContext::run_then`] finishes,
/// with whether the run has failed and the time the value took.
pub type MarkCallback = Box<dyn FnOnce(bool, Duration)>;

pub(crate) struct PendingRun {
    pub value: TaskValue,
    pub callback: Option<MarkCallback>,
}

/// Execution context of a function task
#[derive(Clone)]
pub struct TaskContext {
    name: String,
    argv: Vec<String>,
    arg_opts: ArgValues,
    err: Option<String>,
    pending: Rc<RefCell<Vec<PendingRun>>>,
    orchestrator: Orchestrator,
}

impl TaskContext {
    pub(crate) fn new(
        name: String,
        argv: Vec<String>,
        arg_opts: ArgValues,
        err: Option<String>,
        orchestrator: Orchestrator,
    ) -> Self {
        TaskContext {
            name,
            argv,
            arg_opts,
            err,
            pending: Rc::new(RefCell::new(Vec::new())),
            orchestrator,
        }
    }

    /// Name of the task being executed
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task name followed by the words it was invoked with
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Words after the task name
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn arg_opts(&self) -> &ArgValues {
        &self.arg_opts
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.arg_opts.get(name)
    }

    /// Error of the task stage, set when this function runs as a finally stage
    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// Whether any task of the current run has failed
    pub fn failed(&self) -> bool {
        self.orchestrator.failed()
    }

    /// Queue `value` to run after this function returns, before any value
    /// the function itself returns.
    pub fn run(&self, value: impl Into<TaskValue>) {
        self.pending.borrow_mut().push(PendingRun {
            value: value.into(),
            callback: None,
        });
    }

    /// Like [`TaskContext::run`], calling `callback` once `value` finishes
    pub fn run_then(&self, value: impl Into<TaskValue>, callback: impl FnOnce(bool, Duration) + 'static) {
        self.pending.borrow_mut().push(PendingRun {
            value: value.into(),
            callback: Some(Box::new(callback)),
        });
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingRun> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("argv", &self.argv)
            .field("arg_opts", &self.arg_opts)
            .field("err", &self.err)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_and_pending_runs() {
        let ctx = TaskContext::new(
            "foo".to_string(),
            vec!["foo".to_string(), "a".to_string(), "b".to_string()],
            ArgValues::new(),
            Some("boom".to_string()),
            Orchestrator::new(),
        );
        assert_eq!(ctx.name(), "foo");
        assert_eq!(ctx.args(), ["a", "b"]);
        assert_eq!(ctx.err(), Some("boom"));
        assert!(!ctx.failed());

        ctx.run("bar");
        ctx.run_then("baz", |_, _| {});
        let pending = ctx.take_pending();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].callback.is_none());
        assert!(pending[1].callback.is_some());
        assert!(ctx.take_pending().is_empty());
    }
}
