//! Namespaced task registry
//!
//! Tasks live in namespaces. The default namespace is `/` and is always
//! searched first; the rest follow the order computed from their
//! declared overrides.
//!
//! Lookup forms:
//! - `name` searches every namespace in order
//! - `ns/name` looks only in `ns`
//! - `/name` looks only in the default namespace
//! - a leading `?` makes the lookup optional

mod order;

pub use order::NamespaceOrder;

use crate::error::{RegistryError, RegistryResult, TaskError, TaskResult};
use crate::task::TaskValue;
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

/// Name of the default namespace
pub const DEFAULT_NAMESPACE: &str = "/";

/// Separator between namespace and task name
pub const NS_SEP: char = '/';

/// Prefix that makes a lookup optional
pub const OPTIONAL_MARK: char = '?';

/// A successful lookup
#[derive(Debug, Clone)]
pub struct Lookup {
    pub namespace: String,
    pub name: String,
    pub value: TaskValue,
    /// Found by walking the search order rather than a qualified name
    pub searched: bool,
}

#[derive(Debug, Clone)]
pub struct Registry {
    tasks: HashMap<String, IndexMap<String, TaskValue>>,
    order: NamespaceOrder,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut tasks = HashMap::new();
        tasks.insert(DEFAULT_NAMESPACE.to_string(), IndexMap::new());
        Registry {
            tasks,
            order: NamespaceOrder::new(),
        }
    }

    /// Load tasks into a namespace, creating it if needed
    pub fn load<I, K, V>(&mut self, namespace: &str, tasks: I) -> RegistryResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TaskValue>,
    {
        self.load_overriding(namespace, &[], tasks)
    }

    /// Load tasks into a namespace that takes priority over `overrides`
    pub fn load_overriding<I, K, V>(
        &mut self,
        namespace: &str,
        overrides: &[&str],
        tasks: I,
    ) -> RegistryResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TaskValue>,
    {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };

        let tasks: Vec<(String, TaskValue)> = tasks
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if let Some((name, _)) = tasks
            .iter()
            .find(|(name, _)| name.is_empty() || name.contains(NS_SEP) || name.starts_with(OPTIONAL_MARK))
        {
            return Err(RegistryError::InvalidTaskName(name.clone()));
        }

        if namespace != DEFAULT_NAMESPACE {
            self.order.add(namespace, overrides)?;
        }

        let entries = self.tasks.entry(namespace.to_string()).or_default();
        debug!(namespace, count = tasks.len(), "loading tasks");
        entries.extend(tasks);
        Ok(())
    }

    /// Look up a task by name.
    ///
    /// Returns `Ok(None)` only for a missing optional (`?name`) task.
    pub fn lookup(&self, name: &str) -> TaskResult<Option<Lookup>> {
        let (optional, name) = match name.strip_prefix(OPTIONAL_MARK) {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        if name.is_empty() {
            return Err(TaskError::InvalidName);
        }

        let result = if let Some(rest) = name.strip_prefix(NS_SEP) {
            match rest.split_once(NS_SEP) {
                Some((namespace, task)) => self.lookup_in(namespace, task),
                None => self.lookup_in(DEFAULT_NAMESPACE, rest),
            }
        } else if let Some((namespace, task)) = name.split_once(NS_SEP) {
            self.lookup_in(namespace, task)
        } else {
            self.search(name)
        };

        match result {
            Ok(found) => Ok(Some(found)),
            Err(err) if optional && err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn lookup_in(&self, namespace: &str, name: &str) -> TaskResult<Lookup> {
        let tasks = self
            .tasks
            .get(namespace)
            .ok_or_else(|| TaskError::NamespaceNotFound(namespace.to_string()))?;
        let value = tasks
            .get(name)
            .ok_or_else(|| TaskError::NotFoundInNamespace {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        Ok(Lookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value: value.clone(),
            searched: false,
        })
    }

    fn search(&self, name: &str) -> TaskResult<Lookup> {
        for namespace in self.namespaces() {
            if let Some(value) = self.tasks.get(&namespace).and_then(|t| t.get(name)) {
                return Ok(Lookup {
                    namespace,
                    name: name.to_string(),
                    value: value.clone(),
                    searched: true,
                });
            }
        }
        Err(TaskError::NotFound {
            name: name.to_string(),
        })
    }

    /// Namespaces in search order, default first
    pub fn namespaces(&self) -> Vec<String> {
        std::iter::once(DEFAULT_NAMESPACE.to_string())
            .chain(self.order.order().iter().cloned())
            .collect()
    }

    /// Total number of tasks across all namespaces
    pub fn count(&self) -> usize {
        self.tasks.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Tasks of one namespace in load order
    pub fn entries(&self, namespace: &str) -> Vec<(&str, &TaskValue)> {
        self.tasks
            .get(namespace)
            .map(|tasks| tasks.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }

    fn selected(&self, namespaces: Option<&[&str]>) -> Vec<String> {
        self.namespaces()
            .into_iter()
            .filter(|ns| namespaces.map_or(true, |only| only.contains(&ns.as_str())))
            .collect()
    }

    /// Task names in search order, optionally limited to some namespaces
    pub fn names(&self, namespaces: Option<&[&str]>) -> Vec<String> {
        self.selected(namespaces)
            .iter()
            .flat_map(|ns| self.entries(ns))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Qualified task names: `/name` for the default namespace, `ns/name` otherwise
    pub fn full_names(&self, namespaces: Option<&[&str]>) -> Vec<String> {
        self.selected(namespaces)
            .iter()
            .flat_map(|ns| {
                self.entries(ns)
                    .into_iter()
                    .map(move |(name, _)| qualify(ns, name))
            })
            .collect()
    }
}

/// Qualified form of a task name
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        format!("{}{}", NS_SEP, name)
    } else {
        format!("{}{}{}", namespace, NS_SEP, name)
    }
}
