//! Loading parsed task files into an orchestrator

use crate::config::types::{TaskDef, TaskFile};
use crate::error::ConfigResult;
use crate::registry::DEFAULT_NAMESPACE;
use crate::runner::Orchestrator;
use crate::task::TaskValue;
use indexmap::IndexMap;
use tracing::info;

/// Tasks loaded into one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub namespace: String,
    pub count: usize,
}

/// Apply a task file's settings and load its tasks, included files first
pub fn load_config(orc: &Orchestrator, config: &TaskFile) -> ConfigResult<Vec<Loaded>> {
    if let Some(interpreter) = &config.interpreter {
        let interpreter = interpreter.clone();
        orc.update_config(|c| c.interpreter = interpreter);
    }
    if let Some(policy) = config.stop_on_error {
        orc.set_stop_on_error(policy);
    }

    let mut loaded = Vec::new();
    for included in &config.included {
        loaded.push(load_tasks(
            orc,
            &included.namespace,
            &included.overrides,
            &included.tasks,
        )?);
    }
    let namespace = config.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
    loaded.push(load_tasks(orc, namespace, &config.overrides, &config.tasks)?);
    Ok(loaded)
}

/// Convert task definitions and load them into `namespace`
pub fn load_tasks(
    orc: &Orchestrator,
    namespace: &str,
    overrides: &[String],
    tasks: &IndexMap<String, TaskDef>,
) -> ConfigResult<Loaded> {
    let values = tasks
        .iter()
        .map(|(name, def)| Ok((name.clone(), def.to_value(name)?)))
        .collect::<ConfigResult<Vec<(String, TaskValue)>>>()?;
    let count = values.len();

    let overrides: Vec<&str> = overrides.iter().map(String::as_str).collect();
    orc.load_overriding(namespace, &overrides, values)?;
    info!(namespace, count, "loaded tasks");

    Ok(Loaded {
        namespace: namespace.to_string(),
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config;
    use crate::runner::StopOnError;

    #[test]
    fn test_load_config_applies_settings() {
        let config = parse_config(
            r#"
interpreter: [bash, -c]
stop-on-error: none
namespace: app
tasks:
  build: cargo build
  test: cargo test
"#,
            None,
        )
        .unwrap();
        let orc = Orchestrator::new();
        let loaded = load_config(&orc, &config).unwrap();

        assert_eq!(
            loaded,
            vec![Loaded {
                namespace: "app".to_string(),
                count: 2
            }]
        );
        assert_eq!(orc.config().interpreter, vec!["bash", "-c"]);
        assert_eq!(orc.stop_on_error(), StopOnError::None);
        assert_eq!(orc.registry().full_names(None), vec!["app/build", "app/test"]);
    }

    #[test]
    fn test_load_overriding_namespace() {
        let orc = Orchestrator::new();
        let base = parse_config("namespace: base\ntasks:\n  hello: echo base\n", None).unwrap();
        let local = parse_config(
            "namespace: local\noverrides: base\ntasks:\n  hello: echo local\n",
            None,
        )
        .unwrap();
        load_config(&orc, &base).unwrap();
        load_config(&orc, &local).unwrap();

        let found = orc.registry().lookup("hello").unwrap().unwrap();
        assert_eq!(found.namespace, "local");
    }
}
