//! The orchestrator: registry, failure state and run entry point

use crate::error::{Failure, RegistryResult, TaskError};
use crate::registry::Registry;
use crate::runner::events::{Event, EventBus, Observer};
use crate::runner::executor::Executor;
use crate::runner::queue::{ItemId, ItemKind, NewItem, Origin};
use crate::runner::shell::ChildRegistry;
use crate::runner::suggest::similar_names;
use crate::runner::tree::TaskTree;
use crate::task::TaskValue;
use colored::Colorize;
use serde::Deserialize;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, info};

/// Name of the root item when `run` is given a value rather than a name
const ROOT_NAME: &str = "run";

/// What happens to the rest of a run once a task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum StopOnError {
    /// Keep running everything
    None,
    /// Let running tasks finish but start nothing new
    Soft,
    /// Additionally cancel running shell commands and functions
    #[default]
    Full,
}

impl FromStr for StopOnError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "no" | "none" | "false" => Ok(StopOnError::None),
            "soft" => Ok(StopOnError::Soft),
            "full" | "true" => Ok(StopOnError::Full),
            _ => Err(format!(
                "invalid stop-on-error '{}': expected none, soft or full",
                s
            )),
        }
    }
}

impl TryFrom<String> for StopOnError {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for StopOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopOnError::None => "none",
            StopOnError::Soft => "soft",
            StopOnError::Full => "full",
        };
        write!(f, "{}", name)
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub stop_on_error: StopOnError,
    /// Program and leading arguments used to run shell commands
    pub interpreter: Vec<String>,
    /// Working directory for shell commands, the process cwd when unset
    pub working_dir: Option<PathBuf>,
    /// How often in-flight work checks for a failure under `full`
    pub fail_watch_interval: Duration,
    /// Prefix of the variables handing a failure to finally shells
    pub env_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            stop_on_error: StopOnError::default(),
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            working_dir: None,
            fail_watch_interval: Duration::from_millis(50),
            env_prefix: "TASKSTACK".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_stop_on_error(mut self, policy: StopOnError) -> Self {
        self.stop_on_error = policy;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_fail_watch_interval(mut self, interval: Duration) -> Self {
        self.fail_watch_interval = interval;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }
}

struct Inner {
    config: RefCell<OrchestratorConfig>,
    registry: RefCell<Registry>,
    tree: RefCell<TaskTree>,
    failure: RefCell<Option<Failure>>,
    stopped: Cell<bool>,
    active_runs: Cell<usize>,
    children: RefCell<ChildRegistry>,
    events: EventBus,
}

/// Runs tasks from its registry.
///
/// Cloning is cheap and every clone shares the same state. All work
/// happens on the current thread; `run` drives concurrent branches as
/// local tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Rc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Orchestrator::new()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &*self.inner.config.borrow())
            .field("tasks", &self.inner.registry.borrow().count())
            .field("failed", &self.failed())
            .finish()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Orchestrator::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        Orchestrator {
            inner: Rc::new(Inner {
                config: RefCell::new(config),
                registry: RefCell::new(Registry::new()),
                tree: RefCell::new(TaskTree::new()),
                failure: RefCell::new(None),
                stopped: Cell::new(false),
                active_runs: Cell::new(0),
                children: RefCell::new(ChildRegistry::default()),
                events: EventBus::new(),
            }),
        }
    }

    /// Load tasks into a namespace
    pub fn load<I, K, V>(&self, namespace: &str, tasks: I) -> RegistryResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TaskValue>,
    {
        self.inner.registry.borrow_mut().load(namespace, tasks)
    }

    /// Load tasks into a namespace that takes priority over `overrides`
    pub fn load_overriding<I, K, V>(
        &self,
        namespace: &str,
        overrides: &[&str],
        tasks: I,
    ) -> RegistryResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TaskValue>,
    {
        self.inner
            .registry
            .borrow_mut()
            .load_overriding(namespace, overrides, tasks)
    }

    pub fn registry(&self) -> Ref<'_, Registry> {
        self.inner.registry.borrow()
    }

    pub fn count_tasks(&self) -> usize {
        self.registry().count()
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.inner.config.borrow().clone()
    }

    pub fn update_config(&self, update: impl FnOnce(&mut OrchestratorConfig)) {
        update(&mut self.inner.config.borrow_mut());
    }

    pub fn stop_on_error(&self) -> StopOnError {
        self.inner.config.borrow().stop_on_error
    }

    pub fn set_stop_on_error(&self, policy: StopOnError) {
        self.inner.config.borrow_mut().stop_on_error = policy;
    }

    /// Receive every event synchronously
    pub fn subscribe(&self, observer: impl Observer + 'static) {
        self.inner.events.subscribe(observer);
    }

    /// Receive a copy of every event through a channel
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.channel()
    }

    /// Run a task name, array or any other task value.
    ///
    /// Resolves once everything the target queued has finished. The
    /// error carries the first failure and every failure after it.
    pub async fn run(&self, target: impl Into<TaskValue>) -> Result<(), Failure> {
        let value = target.into();
        let outermost = self.inner.active_runs.get() == 0;
        if outermost {
            self.inner.failure.replace(None);
            self.inner.stopped.set(false);
        }
        self.inner.active_runs.set(self.inner.active_runs.get() + 1);

        info!(task = %value, "run");
        self.emit(Event::Run {
            target: value.to_string(),
        });

        let root = match value {
            TaskValue::Name(name) => NewItem::named(name, ItemKind::Root),
            value => NewItem::valued(ROOT_NAME, value, Origin::Run, ItemKind::Root),
        };
        let created = self.inner.tree.borrow_mut().create(root, None);
        match created {
            Ok(id) => {
                let mut executor = Executor::new(self.clone());
                executor.push(id);
                LocalSet::new().run_until(executor.drive()).await;
            }
            Err(err) => self.fail(err),
        }

        let remaining = self.inner.active_runs.get() - 1;
        self.inner.active_runs.set(remaining);
        let failure = if remaining == 0 {
            self.inner.tree.borrow_mut().clear();
            self.inner.failure.borrow_mut().take()
        } else {
            self.inner.failure.borrow().clone()
        };
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Record a failure for the current run
    pub fn fail(&self, error: TaskError) {
        debug!(error = %error, "failure recorded");
        let mut failure = self.inner.failure.borrow_mut();
        match failure.as_mut() {
            Some(failure) => failure.push(error),
            None => *failure = Some(Failure::new(error)),
        }
    }

    pub fn failed(&self) -> bool {
        self.inner.failure.borrow().is_some()
    }

    /// Stop everything: kill live child processes and skip all queued work
    pub fn stop(&self) {
        self.inner.stopped.set(true);
        let killed = self.inner.children.borrow_mut().kill_all();
        info!(killed, "stopping all tasks");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Number of shell commands currently running
    pub fn live_children(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Lines describing a failure, with suggestions when the failure is an
    /// unknown task name
    pub fn failure_report(&self, failure: &Failure) -> Vec<String> {
        let mut lines = vec!["Execution Failed - Errors:".to_string()];
        for (i, error) in failure.errors().iter().enumerate() {
            lines.push(format!(" {}  {}", i + 1, error));
        }
        if let Some(name) = failure.primary().missing_task() {
            let suggestions = similar_names(name, &self.registry());
            if !suggestions.is_empty() {
                lines.push(format!("Maybe try: {}", suggestions.join(", ")));
            }
        }
        lines
    }

    /// Print a run result and return the process exit code for it
    pub fn default_done(&self, result: &Result<(), Failure>) -> i32 {
        let Err(failure) = result else {
            return 0;
        };
        for (i, line) in self.failure_report(failure).iter().enumerate() {
            if i == 0 {
                eprintln!("{}", line.red().bold());
            } else {
                eprintln!("{}", line);
            }
        }
        match self.stop_on_error() {
            StopOnError::None => 0,
            StopOnError::Soft | StopOnError::Full => 1,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        for message in self.inner.events.publish(&event) {
            self.fail(TaskError::Listener(message));
        }
    }

    pub(crate) fn fail_item(&self, id: ItemId, error: TaskError) {
        if let Some(item) = self.inner.tree.borrow_mut().get_mut(id) {
            item.set_error(error.to_string());
        }
        self.fail(error);
    }

    pub(crate) fn tree(&self) -> Ref<'_, TaskTree> {
        self.inner.tree.borrow()
    }

    pub(crate) fn tree_mut(&self) -> RefMut<'_, TaskTree> {
        self.inner.tree.borrow_mut()
    }

    pub(crate) fn children_mut(&self) -> RefMut<'_, ChildRegistry> {
        self.inner.children.borrow_mut()
    }

    /// Resolves once the run has failed, polling under `full` only
    pub(crate) async fn watch_failure(&self) {
        let (policy, interval) = {
            let config = self.inner.config.borrow();
            (config.stop_on_error, config.fail_watch_interval)
        };
        if policy != StopOnError::Full {
            return futures::future::pending::<()>().await;
        }
        loop {
            tokio::time::sleep(interval).await;
            if self.failed() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_on_error_parse() {
        assert_eq!("no".parse::<StopOnError>().unwrap(), StopOnError::None);
        assert_eq!("soft".parse::<StopOnError>().unwrap(), StopOnError::Soft);
        assert_eq!("full".parse::<StopOnError>().unwrap(), StopOnError::Full);
        assert!("sometimes".parse::<StopOnError>().is_err());
        assert_eq!(StopOnError::default(), StopOnError::Full);
        assert_eq!(StopOnError::Soft.to_string(), "soft");
    }

    #[test]
    fn test_fail_aggregates() {
        let orc = Orchestrator::new();
        assert!(!orc.failed());
        orc.fail(TaskError::msg("first"));
        orc.fail(TaskError::msg("second"));
        assert!(orc.failed());
        let failure = orc.inner.failure.borrow().clone().unwrap();
        assert_eq!(failure.message(), "first");
        assert_eq!(failure.more(), vec!["second".to_string()]);
    }

    #[test]
    fn test_failure_report_suggests_names() {
        let orc = Orchestrator::new();
        orc.load(
            "/",
            [("foo1", "echo"), ("foo2", "echo"), ("blah", "echo")],
        )
        .unwrap();
        let failure = Failure::new(TaskError::NotFound {
            name: "foox".to_string(),
        });
        let lines = orc.failure_report(&failure);
        assert_eq!(lines[1], " 1  Task foox not found");
        assert_eq!(lines[2], "Maybe try: foo1, foo2");
    }

    #[test]
    fn test_default_done_exit_codes() {
        let orc = Orchestrator::new();
        assert_eq!(orc.default_done(&Ok(())), 0);
        let failed = Err(Failure::new(TaskError::msg("boom")));
        assert_eq!(orc.default_done(&failed), 1);
        orc.set_stop_on_error(StopOnError::None);
        assert_eq!(orc.default_done(&failed), 0);
    }
}
