//! The executor loop
//!
//! An executor owns a stack of queue items and completion marks. Each
//! step pops one entry and dispatches it by the shape of the item's
//! current value. Children are pushed back onto the same stack, so
//! nesting depth never grows the call stack. Concurrent arrays hand each
//! branch to a sibling executor running as a local task.

use crate::error::{TaskError, TaskResult};
use crate::runner::context::{MarkCallback, PendingRun, TaskContext};
use crate::runner::env::{update_env, ProcessEnv};
use crate::runner::events::{Event, ExecuteKind, ItemInfo};
use crate::runner::orchestrator::{Orchestrator, StopOnError};
use crate::runner::queue::{ItemId, ItemKind, NewItem, Origin, QueueItem, Stage};
use crate::runner::shell::{self, ShellJob};
use crate::task::{
    parse_arg_opts, split_shell, Composition, EnvSpec, ExecSpec, TaskArray, TaskFn, TaskObject,
    TaskSpec, TaskValue, STR_ARRAY_SIG,
};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Completion sentinel pushed below an item's children
struct Mark {
    target: ItemId,
    started: Instant,
    callback: Option<MarkCallback>,
}

enum Entry {
    Item(ItemId),
    Mark(Mark),
}

/// What a step will do with an item
enum Action {
    Lookup,
    Shell { text: String, anonymous: bool },
    Exec { spec: ExecSpec, anonymous: bool },
    Env(EnvSpec),
    Function(TaskFn),
    Serial(Vec<TaskValue>),
    Concurrent(Vec<TaskValue>),
    Dep(TaskValue),
    /// A task object without the current stage
    Empty,
    Stop,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::Lookup => "lookup",
            Action::Shell { .. } | Action::Exec { .. } => "shell",
            Action::Env(_) => "env",
            Action::Function(_) => "function",
            Action::Serial(_) => "serial",
            Action::Concurrent(_) => "concurrent",
            Action::Dep(_) => "dep",
            Action::Empty => "empty",
            Action::Stop => "stop",
        }
    }
}

pub(crate) struct Executor {
    orc: Orchestrator,
    stack: Vec<Entry>,
}

impl Executor {
    pub(crate) fn new(orc: Orchestrator) -> Self {
        Executor {
            orc,
            stack: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, id: ItemId) {
        self.stack.push(Entry::Item(id));
    }

    fn push_mark(&mut self, target: ItemId, callback: Option<MarkCallback>) {
        self.stack.push(Entry::Mark(Mark {
            target,
            started: Instant::now(),
            callback,
        }));
    }

    /// Run until the stack is empty
    pub(crate) async fn drive(mut self) {
        while let Some(entry) = self.stack.pop() {
            // Give sibling executors a turn between steps.
            tokio::task::yield_now().await;
            match entry {
                Entry::Mark(mark) => self.finalize(mark),
                Entry::Item(id) => {
                    if self.should_skip(id) {
                        continue;
                    }
                    let depth = self.stack.len();
                    if let Err(err) = self.step(id).await {
                        debug!(item = %id, error = %err, "step failed");
                        self.orc.fail_item(id, err);
                        // a step can fail before it marks the item, which
                        // would leave its finally stage unpromoted
                        if !self.marked(id, depth) {
                            self.push_mark(id, None);
                        }
                    }
                }
            }
        }
    }

    /// Whether a completion mark for `id` was pushed above `depth`
    fn marked(&self, id: ItemId, depth: usize) -> bool {
        self.stack[depth.min(self.stack.len())..].iter().any(|entry| {
            matches!(entry, Entry::Mark(mark) if mark.target == id && mark.callback.is_none())
        })
    }

    fn should_skip(&self, id: ItemId) -> bool {
        if self.orc.is_stopped() {
            return true;
        }
        if !self.orc.failed() || self.orc.stop_on_error() == StopOnError::None {
            return false;
        }
        let tree = self.orc.tree();
        let item = &tree[id];
        if item.is_finally() {
            return false;
        }
        debug!(task = item.name(), "skipping after failure");
        true
    }

    async fn step(&mut self, id: ItemId) -> TaskResult<()> {
        let action = self.plan(id)?;
        trace!(item = %id, action = action.label(), "dispatch");
        match action {
            Action::Lookup => self.lookup(id),
            Action::Shell { text, anonymous } => {
                let (flags, cmd) = split_shell(&text)?;
                let job = ShellJob {
                    cmd,
                    flags,
                    env: BTreeMap::new(),
                    timeout: None,
                };
                self.shell(id, job, Duration::ZERO, anonymous).await
            }
            Action::Exec { spec, anonymous } => {
                let job = ShellJob {
                    cmd: spec.cmd,
                    flags: spec.flags,
                    env: spec.env,
                    timeout: spec.timeout,
                };
                self.shell(id, job, spec.delay, anonymous).await
            }
            Action::Env(spec) => {
                self.env(id, spec);
                Ok(())
            }
            Action::Function(task) => self.function(id, task).await,
            Action::Serial(items) => self.serial(id, items),
            Action::Concurrent(items) => self.concurrent(id, items).await,
            Action::Dep(dep) => self.dep(id, dep),
            Action::Empty => {
                self.push_mark(id, None);
                Ok(())
            }
            Action::Stop => {
                self.orc.stop();
                Ok(())
            }
        }
    }

    fn plan(&self, id: ItemId) -> TaskResult<Action> {
        let tree = self.orc.tree();
        let item = &tree[id];
        match item.resolution() {
            None => Ok(Action::Lookup),
            Some(resolution) => plan_value(item, &resolution.value, resolution.origin),
        }
    }

    fn info(&self, id: ItemId) -> ItemInfo {
        self.orc.tree()[id].info()
    }

    fn emit_execute(&self, id: ItemId, kind: ExecuteKind) {
        let item = self.info(id);
        self.orc.emit(Event::Execute { item, kind });
    }

    fn create_child(&self, parent: ItemId, value: TaskValue, kind: ItemKind) -> TaskResult<ItemId> {
        let mut tree = self.orc.tree_mut();
        let spec = NewItem::child(tree[parent].name(), value, kind);
        tree.create(spec, Some(parent))
    }

    fn lookup(&mut self, id: ItemId) -> TaskResult<()> {
        self.emit_execute(id, ExecuteKind::Lookup);
        let found = {
            let registry = self.orc.registry();
            let mut tree = self.orc.tree_mut();
            tree[id].lookup(&registry)?
        };
        match found {
            Some(found) => {
                if found.searched {
                    let item = self.info(id);
                    self.orc.emit(Event::Search {
                        item,
                        namespace: found.namespace,
                    });
                }
                self.stack.push(Entry::Item(id));
            }
            None => {
                let name = self.orc.tree()[id].name().to_string();
                debug!(task = %name, "optional task not found");
                self.orc.emit(Event::NotFound { name });
            }
        }
        Ok(())
    }

    async fn shell(
        &mut self,
        id: ItemId,
        mut job: ShellJob,
        delay: Duration,
        anonymous: bool,
    ) -> TaskResult<()> {
        let (info, object) = {
            let tree = self.orc.tree();
            let item = &tree[id];
            (item.info(), item.object().cloned())
        };
        if let Some(obj) = &object {
            job.flags = job.flags.merge(obj.flags);
            for (key, value) in &obj.env {
                job.env
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let prefix = self.orc.config().env_prefix;
        if let Some(err) = &info.error {
            job.env.insert(format!("{}_ERR", prefix), err.clone());
        }
        if info.error.is_some() || self.orc.failed() {
            job.env.insert(format!("{}_FAILED", prefix), "true".to_string());
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.orc.emit(Event::Execute {
            item: info.clone(),
            kind: ExecuteKind::Shell {
                cmd: job.cmd.clone(),
                anonymous,
            },
        });
        self.push_mark(id, None);
        shell::run(&self.orc, &info, job).await
    }

    fn env(&mut self, id: ItemId, spec: EnvSpec) {
        self.emit_execute(id, ExecuteKind::Env(TaskSpec::Env(spec.clone()).to_string()));
        self.push_mark(id, None);
        update_env(&spec.vars, &mut ProcessEnv, spec.override_existing);
    }

    async fn function(&mut self, id: ItemId, task: TaskFn) -> TaskResult<()> {
        let (info, argv, object) = {
            let tree = self.orc.tree();
            let item = &tree[id];
            (item.info(), item.argv().to_vec(), item.object().cloned())
        };
        self.orc.emit(Event::Execute {
            item: info.clone(),
            kind: ExecuteKind::Function,
        });
        self.push_mark(id, None);

        let arg_opts = match &object {
            Some(obj) => parse_arg_opts(
                &info.name,
                &argv,
                &obj.arg_opts,
                obj.allow_unknown_options,
            )?,
            None => parse_arg_opts(&info.name, &argv, &BTreeMap::new(), true)?,
        };
        let ctx = TaskContext::new(
            info.name.clone(),
            argv,
            arg_opts,
            info.error.clone(),
            self.orc.clone(),
        );

        let future = panic::catch_unwind(AssertUnwindSafe(|| task.call(ctx.clone())))
            .map_err(|payload| panic_error(&info.name, payload))?;

        let failed = async {
            if info.is_finally {
                futures::future::pending::<()>().await
            } else {
                self.orc.watch_failure().await
            }
        };
        let outcome = tokio::select! {
            result = AssertUnwindSafe(future).catch_unwind() => Some(result),
            _ = failed => None,
        };
        let result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(payload)) => return Err(panic_error(&info.name, payload)),
            None => {
                debug!(task = %info.name, "function cancelled after failure");
                self.orc.emit(Event::FailCancel { item: info });
                return Ok(());
            }
        };

        let pending = ctx.take_pending();
        match result {
            Ok(follow_on) => {
                if let Some(value) = follow_on {
                    self.queue_follow_on(id, value)?;
                }
                self.queue_pending(id, pending)
            }
            Err(err) => {
                self.queue_pending(id, pending)?;
                Err(err)
            }
        }
    }

    /// Queue values from [`TaskContext::run`], first call on top
    fn queue_pending(&mut self, id: ItemId, pending: Vec<PendingRun>) -> TaskResult<()> {
        for run in pending.into_iter().rev() {
            if let Some(callback) = run.callback {
                self.push_mark(id, Some(callback));
            }
            self.queue_follow_on(id, run.value)?;
        }
        Ok(())
    }

    fn queue_follow_on(&mut self, id: ItemId, value: TaskValue) -> TaskResult<()> {
        let value = match value {
            TaskValue::Name(text) if text.starts_with(STR_ARRAY_SIG) => {
                TaskValue::Array(TaskArray::parse(&text[1..])?)
            }
            value => value,
        };
        let child = self.create_child(id, value, ItemKind::FollowOn)?;
        self.stack.push(Entry::Item(child));
        Ok(())
    }

    fn serial(&mut self, id: ItemId, items: Vec<TaskValue>) -> TaskResult<()> {
        self.emit_execute(id, ExecuteKind::SerialArray(labels(&items)));
        self.push_mark(id, None);
        let children = items
            .into_iter()
            .map(|value| self.create_child(id, value, ItemKind::SerialChild))
            .collect::<TaskResult<Vec<_>>>()?;
        for child in children.into_iter().rev() {
            self.stack.push(Entry::Item(child));
        }
        Ok(())
    }

    async fn concurrent(&mut self, id: ItemId, items: Vec<TaskValue>) -> TaskResult<()> {
        self.emit_execute(id, ExecuteKind::ConcurrentArray(labels(&items)));
        self.push_mark(id, None);
        let children = items
            .into_iter()
            .map(|value| self.create_child(id, value, ItemKind::ConcurrentChild))
            .collect::<TaskResult<Vec<_>>>()?;

        let mut names = Vec::with_capacity(children.len());
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            let name = self.orc.tree()[child].name().to_string();
            self.orc.emit(Event::SpawnAsync { name: name.clone() });

            let mut sibling = Executor::new(self.orc.clone());
            sibling.push(child);
            let branch = sibling.drive().boxed_local();
            let orc = self.orc.clone();
            let done_name = name.clone();
            handles.push(tokio::task::spawn_local(async move {
                branch.await;
                orc.emit(Event::DoneAsync { name: done_name });
            }));
            names.push(name);
        }

        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            if let Err(err) = joined {
                debug!(task = %name, error = %err, "concurrent branch aborted");
                self.orc.fail(TaskError::Aborted(name));
            }
        }
        Ok(())
    }

    fn dep(&mut self, id: ItemId, dep: TaskValue) -> TaskResult<()> {
        self.emit_execute(id, ExecuteKind::Dep);
        let dep_id = {
            let mut tree = self.orc.tree_mut();
            tree[id].mark_dep_done();
            let spec = NewItem::dependency(tree[id].name(), dep, id);
            let parent = tree[id].parent();
            tree.create(spec, parent)?
        };
        // the item runs again once its dependencies finish
        self.stack.push(Entry::Item(id));
        self.stack.push(Entry::Item(dep_id));
        Ok(())
    }

    fn finalize(&mut self, mark: Mark) {
        let elapsed = mark.started.elapsed();
        if let Some(callback) = mark.callback {
            callback(self.orc.failed(), elapsed);
            return;
        }

        let item = self.info(mark.target);
        let error = item.error.clone();
        self.orc.emit(Event::DoneItem {
            item,
            elapsed,
            error,
        });

        let promoted = {
            let mut tree = self.orc.tree_mut();
            let item = &mut tree[mark.target];
            if item.has_pending_finally() {
                item.enter_finally();
                true
            } else {
                false
            }
        };
        if promoted {
            self.stack.push(Entry::Item(mark.target));
        }
    }
}

fn plan_value(item: &QueueItem, value: &TaskValue, origin: Origin) -> TaskResult<Action> {
    let top = origin.is_top();
    let action = match value {
        TaskValue::Object(obj) => return plan_object(item, obj),
        // names are only ever attached as task definitions; everywhere
        // else they become lookups when the item is created
        TaskValue::Name(text) => return plan_text(text),
        TaskValue::Shell(text) => Action::Shell {
            text: text.clone(),
            anonymous: !top,
        },
        TaskValue::Function(task) => Action::Function(task.clone()),
        TaskValue::Array(array) => {
            let serial = origin == Origin::Run
                || match array.composition {
                    Composition::Serial => true,
                    Composition::Concurrent => false,
                    Composition::Default => top,
                };
            if serial {
                Action::Serial(array.items.clone())
            } else {
                Action::Concurrent(array.items.clone())
            }
        }
        TaskValue::Spec(TaskSpec::Exec(spec)) => Action::Exec {
            spec: spec.clone(),
            anonymous: !top,
        },
        TaskValue::Spec(TaskSpec::Env(spec)) => Action::Env(spec.clone()),
        TaskValue::Stop => Action::Stop,
    };
    Ok(action)
}

/// A plain string in a task definition: a `~[..]` array or a shell command
fn plan_text(text: &str) -> TaskResult<Action> {
    if text.starts_with(STR_ARRAY_SIG) {
        let array = TaskArray::parse(&text[1..])?;
        return Ok(match array.composition {
            Composition::Concurrent => Action::Concurrent(array.items),
            _ => Action::Serial(array.items),
        });
    }
    Ok(Action::Shell {
        text: text.to_string(),
        anonymous: false,
    })
}

fn plan_object(item: &QueueItem, obj: &TaskObject) -> TaskResult<Action> {
    if let Some(dep) = &obj.dep {
        if !item.dep_done() {
            return Ok(Action::Dep(dep.clone()));
        }
    }
    let stage = match item.stage() {
        Stage::Task => obj.task.as_ref(),
        Stage::Finally => obj.finally.as_ref(),
    };
    match stage {
        None => Ok(Action::Empty),
        Some(TaskValue::Object(_)) => Err(TaskError::UnknownTaskShape {
            name: item.name().to_string(),
            shape: "object".to_string(),
        }),
        // stages are task definitions
        Some(value) => plan_value(item, value, Origin::Registry),
    }
}

fn labels(items: &[TaskValue]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn panic_error(name: &str, payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    };
    TaskError::FunctionPanic {
        name: name.to_string(),
        message,
    }
}
