//! Search order of task namespaces
//!
//! A namespace may declare that it overrides others. Each namespace gets
//! a priority one higher than every namespace it overrides, and lookups
//! search namespaces from highest priority down. Namespaces of equal
//! priority keep the order they were added in.

use crate::error::{RegistryError, RegistryResult};
use std::collections::HashMap;

const MAX_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
struct Entry {
    priority: u32,
    overrides: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceOrder {
    /// Namespaces in the order they were first added
    added: Vec<String>,
    entries: HashMap<String, Entry>,
    /// Current search order
    order: Vec<String>,
}

impl NamespaceOrder {
    pub fn new() -> Self {
        NamespaceOrder::default()
    }

    /// Add `name`, or extend the namespaces it overrides, and recompute the order
    pub fn add(&mut self, name: &str, overrides: &[&str]) -> RegistryResult<&[String]> {
        for other in overrides {
            let reverse = self
                .entries
                .get(*other)
                .is_some_and(|e| e.overrides.iter().any(|o| o == name));
            if reverse || *other == name {
                return Err(RegistryError::CircularOverride(
                    name.to_string(),
                    other.to_string(),
                ));
            }
        }

        if !self.entries.contains_key(name) {
            self.added.push(name.to_string());
            self.order.push(name.to_string());
        }
        let entry = self.entries.entry(name.to_string()).or_insert(Entry {
            priority: 1,
            overrides: Vec::new(),
        });
        for other in overrides {
            if !entry.overrides.iter().any(|o| o == other) {
                entry.overrides.push(other.to_string());
            }
        }

        self.recompute()?;
        Ok(&self.order)
    }

    fn recompute(&mut self) -> RegistryResult<()> {
        for entry in self.entries.values_mut() {
            entry.priority = 1;
        }

        let mut rounds = 0;
        loop {
            let mut settled = true;
            for name in &self.added {
                let highest = match self.entries.get(name) {
                    Some(entry) => entry
                        .overrides
                        .iter()
                        .filter_map(|o| self.entries.get(o))
                        .map(|o| o.priority)
                        .max()
                        .unwrap_or(1)
                        .max(1),
                    None => continue,
                };
                if let Some(entry) = self.entries.get_mut(name) {
                    if entry.priority <= highest && !entry.overrides.is_empty() {
                        entry.priority = highest + 1;
                        settled = false;
                    }
                }
            }
            rounds += 1;
            if settled {
                break;
            }
            if rounds >= MAX_ROUNDS {
                return Err(RegistryError::OverrideLoop);
            }
        }

        let entries = &self.entries;
        // stable, so equal priorities keep their current relative order
        self.order.sort_by(|a, b| {
            let pa = entries.get(a).map_or(0, |e| e.priority);
            let pb = entries.get(b).map_or(0, |e| e.priority);
            pb.cmp(&pa)
        });
        Ok(())
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_overrides() {
        let mut order = NamespaceOrder::new();
        assert_eq!(order.add("hello", &[]).unwrap(), ["hello"]);
        assert_eq!(order.add("world", &[]).unwrap(), ["hello", "world"]);
        assert_eq!(
            order.add("foo", &["hello"]).unwrap(),
            ["foo", "hello", "world"]
        );
        assert_eq!(
            order.add("bar", &["hello", "world"]).unwrap(),
            ["foo", "bar", "hello", "world"]
        );
        assert_eq!(
            order.add("bar", &["blah"]).unwrap(),
            ["foo", "bar", "hello", "world"]
        );
        assert_eq!(
            order.add("blah", &["foo"]).unwrap(),
            ["bar", "blah", "foo", "hello", "world"]
        );
    }

    #[test]
    fn test_first_level_circular_override() {
        let mut order = NamespaceOrder::new();
        order.add("hello", &["world"]).unwrap();
        let err = order.add("world", &["hello"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "circular namespace override between 'world' and 'hello'"
        );
    }

    #[test]
    fn test_deep_circular_override() {
        let mut order = NamespaceOrder::new();
        order.add("hello", &["world"]).unwrap();
        order.add("world", &["blah"]).unwrap();
        let err = order.add("blah", &["hello"]).unwrap_err();
        assert_eq!(err, RegistryError::OverrideLoop);
    }
}
