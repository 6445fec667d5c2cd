//! Queue items: one node of the execution tree per task invocation

use crate::error::{TaskError, TaskResult};
use crate::registry::{Lookup, Registry, DEFAULT_NAMESPACE};
use crate::runner::events::ItemInfo;
use crate::task::{TaskObject, TaskValue};
use std::fmt;
use std::rc::Rc;

/// Arena index of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an item came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Root,
    SerialChild,
    ConcurrentChild,
    /// Returned or queued by a task function
    FollowOn,
    /// Dependency chain of a task object
    Dep,
}

impl ItemKind {
    /// Suffix appended to the parent name for unnamed children
    fn suffix(self) -> &'static str {
        match self {
            ItemKind::SerialChild => ".S",
            ItemKind::ConcurrentChild => ".C",
            ItemKind::FollowOn => ".fR",
            ItemKind::Root | ItemKind::Dep => "",
        }
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The value handed directly to `run`
    Run,
    /// An array element or function follow-on
    Value,
    /// A registry hit
    Registry,
    /// A task object's `dep`
    Dependency,
}

impl Origin {
    /// Top values are task definitions: plain strings in them are shell
    /// commands and unmarked arrays run serially.
    pub fn is_top(self) -> bool {
        matches!(self, Origin::Registry | Origin::Dependency)
    }
}

/// One step of resolving an item's name to something executable
#[derive(Debug, Clone)]
pub struct Resolution {
    pub value: TaskValue,
    pub origin: Origin,
}

/// Which stage of a task object an item is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Task,
    Finally,
}

/// Parameters for a new queue item
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub value: Option<Resolution>,
    pub kind: ItemKind,
    pub dep_of: Option<ItemId>,
}

impl NewItem {
    /// An item resolved by looking its name up in the registry
    pub fn named(name: impl Into<String>, kind: ItemKind) -> Self {
        NewItem {
            name: name.into(),
            value: None,
            kind,
            dep_of: None,
        }
    }

    pub fn valued(name: impl Into<String>, value: TaskValue, origin: Origin, kind: ItemKind) -> Self {
        NewItem {
            name: name.into(),
            value: Some(Resolution { value, origin }),
            kind,
            dep_of: None,
        }
    }

    /// The dependency chain of `owner`, which shares its name
    pub fn dependency(name: impl Into<String>, value: TaskValue, owner: ItemId) -> Self {
        NewItem {
            dep_of: Some(owner),
            ..NewItem::valued(name, value, Origin::Dependency, ItemKind::Dep)
        }
    }

    /// A child for an array element or follow-on. Name strings become
    /// lookups; anything else is attached as the child's value.
    pub fn child(parent_name: &str, value: TaskValue, kind: ItemKind) -> Self {
        match value {
            TaskValue::Name(name) => NewItem::named(name, kind),
            value => NewItem::valued(
                format!("{}{}", parent_name, kind.suffix()),
                value,
                Origin::Value,
                kind,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    id: ItemId,
    name: String,
    argv: Vec<String>,
    namespace: String,
    level: usize,
    parent: Option<ItemId>,
    kind: ItemKind,
    resolved: Vec<Resolution>,
    anonymous: bool,
    dep_of: Option<ItemId>,
    dep_done: bool,
    stage: Stage,
    is_finally: bool,
    error: Option<String>,
}

impl QueueItem {
    pub(crate) fn new(id: ItemId, spec: NewItem, parent: Option<&QueueItem>) -> TaskResult<Self> {
        let argv: Vec<String> = spec.name.split_whitespace().map(String::from).collect();
        let name = argv.first().cloned().ok_or(TaskError::InvalidName)?;

        Ok(QueueItem {
            id,
            name,
            argv,
            namespace: parent
                .map(|p| p.namespace.clone())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            level: parent.map_or(0, |p| p.level + 1),
            parent: parent.map(|p| p.id),
            kind: spec.kind,
            anonymous: spec.value.is_some() && spec.kind != ItemKind::Dep,
            resolved: spec.value.into_iter().collect(),
            dep_of: spec.dep_of,
            dep_done: false,
            stage: Stage::Task,
            is_finally: parent.is_some_and(|p| p.is_finally),
            error: None,
        })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name followed by the words given with it
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn dep_of(&self) -> Option<ItemId> {
        self.dep_of
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_finally(&self) -> bool {
        self.is_finally
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn set_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// Latest resolution, or `None` while the name is unresolved
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolved.last()
    }

    pub(crate) fn resolve(&mut self, resolution: Resolution) {
        self.resolved.push(resolution);
    }

    /// Resolve the item's name against the registry.
    ///
    /// A hit is recorded as a new resolution and moves the item into the
    /// namespace it was found in.
    pub fn lookup(&mut self, registry: &Registry) -> TaskResult<Option<Lookup>> {
        let found = registry.lookup(&self.name)?;
        if let Some(found) = &found {
            self.namespace = found.namespace.clone();
            self.resolve(Resolution {
                value: found.value.clone(),
                origin: Origin::Registry,
            });
        }
        Ok(found)
    }

    /// The task object this item is executing, if any
    pub fn object(&self) -> Option<&Rc<TaskObject>> {
        match self.resolution() {
            Some(Resolution {
                value: TaskValue::Object(obj),
                ..
            }) => Some(obj),
            _ => None,
        }
    }

    pub fn dep_done(&self) -> bool {
        self.dep_done
    }

    pub(crate) fn mark_dep_done(&mut self) {
        self.dep_done = true;
    }

    /// True when the item's object has a finally stage that has not run
    pub fn has_pending_finally(&self) -> bool {
        !self.is_finally && self.object().is_some_and(|obj| obj.finally.is_some())
    }

    pub(crate) fn enter_finally(&mut self) {
        self.stage = Stage::Finally;
        self.is_finally = true;
    }

    pub fn info(&self) -> ItemInfo {
        ItemInfo {
            id: self.id,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            level: self.level,
            anonymous: self.anonymous,
            is_finally: self.is_finally,
            is_dep: self.dep_of.is_some(),
            error: self.error.clone(),
        }
    }
}
