//! Environment mutation for env specs

use std::collections::{BTreeMap, HashMap};
use std::env;

/// A mutable set of environment variables
pub trait EnvTarget {
    fn contains(&self, key: &str) -> bool;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// The environment of the current process, inherited by every child
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvTarget for ProcessEnv {
    fn contains(&self, key: &str) -> bool {
        env::var_os(key).is_some()
    }

    fn set(&mut self, key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn remove(&mut self, key: &str) {
        env::remove_var(key);
    }
}

impl EnvTarget for HashMap<String, String> {
    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        HashMap::remove(self, key);
    }
}

/// Apply `vars` to `target`. `None` removes a variable. Without
/// `override_existing`, variables already present are left untouched.
pub fn update_env<T: EnvTarget>(
    vars: &BTreeMap<String, Option<String>>,
    target: &mut T,
    override_existing: bool,
) {
    for (key, value) in vars {
        if !override_existing && target.contains(key) {
            continue;
        }
        match value {
            Some(value) => target.set(key, value),
            None => target.remove(key),
        }
    }
}
