//! Task file validation
//!
//! This module checks a parsed task file before anything is loaded.

use crate::config::types::{TaskDef, TaskFile};
use crate::error::{ConfigError, ConfigResult};
use crate::registry::{DEFAULT_NAMESPACE, NS_SEP, OPTIONAL_MARK};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Validate a complete task file, including included files
pub fn validate_config(config: &TaskFile) -> ConfigResult<()> {
    if let Some(interpreter) = &config.interpreter {
        if interpreter.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter must name at least one program".to_string(),
            ));
        }
    }
    if let Some(namespace) = &config.namespace {
        validate_namespace(namespace)?;
    }

    validate_tasks(&config.tasks)?;
    for included in &config.included {
        validate_namespace(&included.namespace)?;
        validate_tasks(&included.tasks)?;
    }
    Ok(())
}

fn validate_tasks(tasks: &IndexMap<String, TaskDef>) -> ConfigResult<()> {
    for (name, def) in tasks {
        validate_task(name, def)?;
    }
    detect_circular_task_dependencies(tasks)
}

/// Validate a single task definition
pub fn validate_task(name: &str, def: &TaskDef) -> ConfigResult<()> {
    if name.is_empty() || name.contains(NS_SEP) || name.starts_with(OPTIONAL_MARK) {
        return Err(ConfigError::InvalidTask {
            task: name.to_string(),
            reason: format!(
                "names cannot be empty, contain '{}' or start with '{}'",
                NS_SEP, OPTIONAL_MARK
            ),
        });
    }
    // Converting checks flags and option types.
    def.to_value(name)?;
    Ok(())
}

fn validate_namespace(namespace: &str) -> ConfigResult<()> {
    if namespace == DEFAULT_NAMESPACE {
        return Ok(());
    }
    if namespace.is_empty() || namespace.contains(NS_SEP) {
        return Err(ConfigError::Invalid(format!(
            "Invalid namespace '{}'",
            namespace
        )));
    }
    Ok(())
}

/// The names a task waits on or runs as part of itself
fn edges(def: &TaskDef) -> Vec<&str> {
    match def {
        TaskDef::Object(obj) => [&obj.dep, &obj.task]
            .into_iter()
            .flatten()
            .flat_map(|stage| stage.references())
            .collect(),
        def => def.references(),
    }
}

/// Detect cycles among tasks that reference each other by name
fn detect_circular_task_dependencies(tasks: &IndexMap<String, TaskDef>) -> ConfigResult<()> {
    let mut visited = HashSet::new();
    for name in tasks.keys() {
        let mut stack = Vec::new();
        check_task_cycle(tasks, name, &mut visited, &mut stack)?;
    }
    Ok(())
}

fn check_task_cycle<'a>(
    tasks: &'a IndexMap<String, TaskDef>,
    name: &'a str,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> ConfigResult<()> {
    if stack.contains(&name) {
        stack.push(name);
        return Err(ConfigError::CircularDependency(stack.join(" -> ")));
    }
    if visited.contains(name) {
        return Ok(());
    }
    // Names from other namespaces are resolved at run time.
    let Some(def) = tasks.get(name) else {
        return Ok(());
    };

    stack.push(name);
    for next in edges(def) {
        check_task_cycle(tasks, next, visited, stack)?;
    }
    stack.pop();
    visited.insert(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config;

    #[test]
    fn test_validate_valid_config() {
        let config = parse_config(
            r#"
tasks:
  build: cargo build
  test:
    dep: [build]
    task: cargo test
  all: [build, test]
"#,
            None,
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_task_name() {
        let config = parse_config("tasks:\n  a/b: echo\n", None).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidTask { .. })
        ));
    }

    #[test]
    fn test_validate_empty_interpreter() {
        let config = parse_config("interpreter: []\ntasks:\n  a: echo\n", None).unwrap();
        assert!(matches!(validate_config(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_detect_circular_dependency() {
        let config = parse_config(
            r#"
tasks:
  a:
    dep: [b]
    task: echo a
  b: [c]
  c: [a]
"#,
            None,
        )
        .unwrap();
        match validate_config(&config) {
            Err(ConfigError::CircularDependency(chain)) => assert_eq!(chain, "a -> b -> c -> a"),
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_names_are_not_cycles() {
        let config = parse_config("tasks:\n  a: [npm/build, '?missing']\n", None).unwrap();
        assert!(validate_config(&config).is_ok());
    }
}
