//! Task file types
//!
//! This module defines the data structures that represent a taskstack.yml file
//! and their conversion into task values.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::StopOnError;
use crate::task::{
    ArgOption, CommandLine, OptionType, ShellFlags, TaskArray, TaskObject, TaskSpec, TaskValue,
};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// Top-level task file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskFile {
    /// Project name shown in the task list
    #[serde(default)]
    pub name: Option<String>,

    /// Usage line shown in the task list
    #[serde(default)]
    pub usage: Option<String>,

    /// Interpreter for shell commands (e.g., ["bash", "-c"])
    #[serde(default)]
    pub interpreter: Option<Vec<String>>,

    #[serde(default)]
    pub stop_on_error: Option<StopOnError>,

    /// Namespace the tasks load into, the default namespace when absent
    #[serde(default)]
    pub namespace: Option<String>,

    /// Namespaces these tasks take priority over
    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub overrides: Vec<String>,

    #[serde(default)]
    pub include: Vec<Include>,

    #[serde(default)]
    pub tasks: IndexMap<String, TaskDef>,

    /// Tasks of included files, filled in while parsing
    #[serde(skip)]
    pub included: Vec<IncludedTasks>,
}

/// Another task file loaded into its own namespace
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Include {
    pub file: String,

    pub namespace: String,

    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub overrides: Vec<String>,
}

/// Tasks read from an included file
#[derive(Debug, Clone)]
pub struct IncludedTasks {
    pub namespace: String,
    pub overrides: Vec<String>,
    pub tasks: IndexMap<String, TaskDef>,
}

/// One task definition.
///
/// - a string is a shell command
/// - a list runs its entries serially, a leading `.` is allowed
/// - `serial:` / `concurrent:` mappings pick the composition explicitly
/// - `exec:` runs a command with flags, environment, delay and timeout
/// - `set-environment:` updates the process environment
/// - any other mapping is a task object (`desc`, `dep`, `task`, `finally`, ...)
#[derive(Debug, Clone, PartialEq)]
pub enum TaskDef {
    Command(String),
    List(Vec<TaskDef>),
    Serial(Vec<TaskDef>),
    Concurrent(Vec<TaskDef>),
    Exec(ExecDef),
    SetEnv(EnvDef),
    Object(ObjectDef),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExecDef {
    pub exec: CommandDef,

    #[serde(default)]
    pub flags: Option<FlagsDef>,

    #[serde(default, deserialize_with = "deserialize_env_map")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EnvDef {
    /// Variables to set; `null` removes a variable
    #[serde(deserialize_with = "deserialize_env_updates")]
    pub set_environment: BTreeMap<String, Option<String>>,

    /// Replace variables that are already set
    #[serde(default = "default_true", rename = "override")]
    pub override_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObjectDef {
    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub dep: Option<Box<TaskDef>>,

    #[serde(default)]
    pub task: Option<Box<TaskDef>>,

    #[serde(default)]
    pub finally: Option<Box<TaskDef>>,

    #[serde(default)]
    pub flags: Option<FlagsDef>,

    #[serde(default, deserialize_with = "deserialize_env_map")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub arg_opts: BTreeMap<String, ArgOptDef>,

    #[serde(default = "default_true")]
    pub allow_unknown_options: bool,
}

/// A command as one line or as a list of words
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandDef {
    Line(String),
    Words(Vec<String>),
}

/// Shell flags as `"tty,noenv"`, `[tty, noenv]` or `{tty: true}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlagsDef {
    Text(String),
    Names(Vec<String>),
    Map(BTreeMap<String, bool>),
}

/// A declared task option
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgOptDef {
    #[serde(rename = "type", default = "default_option_type")]
    pub option_type: String,

    #[serde(default, deserialize_with = "deserialize_one_or_many")]
    pub alias: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub default: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub usage: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_option_type() -> String {
    "string".to_string()
}

impl FlagsDef {
    pub fn to_flags(&self, task: &str) -> ConfigResult<ShellFlags> {
        let flags = match self {
            FlagsDef::Text(text) => ShellFlags::parse(text, task)?,
            FlagsDef::Names(names) => ShellFlags::from_names(names.iter().map(String::as_str), task)?,
            FlagsDef::Map(map) => ShellFlags::from_map(map, task)?,
        };
        Ok(flags)
    }
}

impl From<&CommandDef> for CommandLine {
    fn from(def: &CommandDef) -> Self {
        match def {
            CommandDef::Line(line) => CommandLine::from(line.as_str()),
            CommandDef::Words(words) => CommandLine::from(words.clone()),
        }
    }
}

impl ArgOptDef {
    pub fn to_option(&self, task: &str, name: &str) -> ConfigResult<ArgOption> {
        let option_type =
            OptionType::parse(&self.option_type).ok_or_else(|| ConfigError::InvalidTask {
                task: task.to_string(),
                reason: format!(
                    "option '{}' has invalid type '{}', must be one of: string, bool, int, float",
                    name, self.option_type
                ),
            })?;
        Ok(ArgOption {
            name: name.to_string(),
            alias: self.alias.clone(),
            option_type,
            default: self.default.clone(),
            required: self.required,
            usage: self.usage.clone(),
        })
    }
}

impl TaskDef {
    /// Convert to the task value loaded into the registry
    pub fn to_value(&self, task: &str) -> ConfigResult<TaskValue> {
        let value = match self {
            TaskDef::Command(text) => TaskValue::from(text.as_str()),
            TaskDef::List(items) => TaskValue::Array(TaskArray::from_values(to_values(items, task)?)),
            TaskDef::Serial(items) => TaskValue::Array(TaskArray::serial(to_values(items, task)?)),
            TaskDef::Concurrent(items) => {
                TaskValue::Array(TaskArray::concurrent(to_values(items, task)?))
            }
            TaskDef::Exec(def) => {
                let mut spec = TaskSpec::exec(CommandLine::from(&def.exec))
                    .with_delay(Duration::from_millis(def.delay_ms));
                if let Some(flags) = &def.flags {
                    spec = spec.with_flags(flags.to_flags(task)?);
                }
                for (key, value) in &def.env {
                    spec = spec.with_env(key, value);
                }
                if let Some(timeout) = def.timeout_ms {
                    spec = spec.with_timeout(Duration::from_millis(timeout));
                }
                TaskValue::Spec(spec)
            }
            TaskDef::SetEnv(def) => {
                let spec = TaskSpec::env(def.set_environment.clone());
                TaskValue::Spec(if def.override_existing {
                    spec
                } else {
                    spec.keep_existing()
                })
            }
            TaskDef::Object(def) => TaskValue::Object(Rc::new(def.to_object(task)?)),
        };
        Ok(value)
    }

    /// Names this definition refers to directly
    pub fn references(&self) -> Vec<&str> {
        match self {
            TaskDef::List(items) | TaskDef::Serial(items) | TaskDef::Concurrent(items) => items
                .iter()
                .filter_map(|item| match item {
                    TaskDef::Command(name) if !name.starts_with('~') && name != "." => {
                        Some(name.as_str())
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Human readable description for the task list
    pub fn desc(&self) -> Option<&str> {
        match self {
            TaskDef::Object(def) => def.desc.as_deref(),
            _ => None,
        }
    }
}

impl ObjectDef {
    fn to_object(&self, task: &str) -> ConfigResult<TaskObject> {
        let stage = |def: &Option<Box<TaskDef>>| -> ConfigResult<Option<TaskValue>> {
            def.as_deref().map(|def| def.to_value(task)).transpose()
        };
        let mut object = TaskObject {
            desc: self.desc.clone(),
            dep: stage(&self.dep)?,
            task: stage(&self.task)?,
            finally: stage(&self.finally)?,
            env: self.env.clone(),
            allow_unknown_options: self.allow_unknown_options,
            ..TaskObject::default()
        };
        if let Some(flags) = &self.flags {
            object.flags = flags.to_flags(task)?;
        }
        for (name, def) in &self.arg_opts {
            object.arg_opts.insert(name.clone(), def.to_option(task, name)?);
        }
        Ok(object)
    }
}

fn to_values(items: &[TaskDef], task: &str) -> ConfigResult<Vec<TaskValue>> {
    items.iter().map(|item| item.to_value(task)).collect()
}

impl<'de> Deserialize<'de> for TaskDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        task_def_from_value(value).map_err(D::Error::custom)
    }
}

fn task_def_from_value(value: Value) -> Result<TaskDef, String> {
    match value {
        Value::String(s) => Ok(TaskDef::Command(s)),
        Value::Sequence(seq) => Ok(TaskDef::List(list_from_values(seq)?)),
        Value::Mapping(map) => {
            let has = |key: &str| map.contains_key(key);
            if has("serial") || has("concurrent") {
                if map.len() != 1 {
                    return Err("serial and concurrent lists must be the only key".to_string());
                }
                let serial = has("serial");
                let items = map
                    .into_iter()
                    .next()
                    .map(|(_, items)| items)
                    .unwrap_or(Value::Null);
                let Value::Sequence(seq) = items else {
                    return Err("serial and concurrent must be lists".to_string());
                };
                let items = list_from_values(seq)?;
                Ok(if serial {
                    TaskDef::Serial(items)
                } else {
                    TaskDef::Concurrent(items)
                })
            } else if has("exec") {
                ExecDef::deserialize(Value::Mapping(map))
                    .map(TaskDef::Exec)
                    .map_err(|e| e.to_string())
            } else if has("set-environment") {
                EnvDef::deserialize(Value::Mapping(map))
                    .map(TaskDef::SetEnv)
                    .map_err(|e| e.to_string())
            } else {
                ObjectDef::deserialize(Value::Mapping(map))
                    .map(TaskDef::Object)
                    .map_err(|e| e.to_string())
            }
        }
        Value::Tagged(tagged) => task_def_from_value(tagged.value),
        Value::Null => Err("task definition is empty".to_string()),
        _ => Err("task must be a string, list or mapping".to_string()),
    }
}

fn list_from_values(seq: Vec<Value>) -> Result<Vec<TaskDef>, String> {
    seq.into_iter().map(task_def_from_value).collect()
}

/// Accept a single string or a list of strings
fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(D::Error::custom("expected a list of strings")),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("expected a string or a list of strings")),
    }
}

fn scalar_to_string(value: Value) -> Result<Option<String>, String> {
    match value {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Null => Ok(None),
        _ => Err("expected a string, number or boolean".to_string()),
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    scalar_to_string(Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn deserialize_env_updates<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
    map.into_iter()
        .map(|(key, value)| {
            scalar_to_string(value)
                .map(|value| (key.clone(), value))
                .map_err(|e| D::Error::custom(format!("{}: {}", key, e)))
        })
        .collect()
}

fn deserialize_env_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_env_updates(deserializer)?
        .into_iter()
        .map(|(key, value)| (key, value.unwrap_or_default()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(yaml: &str) -> TaskDef {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_deserialize_task_file() {
        let yaml = r#"
name: demo
stop-on-error: soft
overrides: npm
tasks:
  hello: echo hello
  all: [hello, world]
"#;
        let file: TaskFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.name.as_deref(), Some("demo"));
        assert_eq!(file.stop_on_error, Some(StopOnError::Soft));
        assert_eq!(file.overrides, vec!["npm"]);
        assert_eq!(file.tasks.keys().collect::<Vec<_>>(), vec!["hello", "all"]);
        assert_eq!(file.tasks["hello"], TaskDef::Command("echo hello".to_string()));
    }

    #[test]
    fn test_deserialize_shapes() {
        assert!(matches!(def("[a, b]"), TaskDef::List(items) if items.len() == 2));
        assert!(matches!(def("serial: [a, b]"), TaskDef::Serial(_)));
        assert!(matches!(def("concurrent: [a, [b, c]]"), TaskDef::Concurrent(_)));
        assert!(matches!(def("exec: [echo, hi]"), TaskDef::Exec(_)));
        assert!(matches!(def("set-environment: {A: 1}"), TaskDef::SetEnv(_)));
        assert!(matches!(def("task: echo hi"), TaskDef::Object(_)));
    }

    #[test]
    fn test_deserialize_rejects_unknown_object_fields() {
        let result: Result<TaskDef, _> = serde_yaml::from_str("tsak: echo hi");
        assert!(result.is_err());
        let result: Result<TaskDef, _> = serde_yaml::from_str("serial: [a]\nconcurrent: [b]");
        assert!(result.is_err());
        let result: Result<TaskDef, _> = serde_yaml::from_str("42");
        assert!(result.is_err());
    }

    #[test]
    fn test_exec_to_value() {
        let value = def(
            r#"
exec: [echo, hello]
flags: [tty]
env: {FOO: bar}
"#,
        )
        .to_value("greet")
        .unwrap();
        assert_eq!(value.to_string(), "exec(tty) {FOO=bar} 'echo hello'");
    }

    #[test]
    fn test_set_env_to_value() {
        let value = def("set-environment: {A: 1, B: ~}\noverride: false")
            .to_value("env")
            .unwrap();
        match value {
            TaskValue::Spec(TaskSpec::Env(spec)) => {
                assert!(!spec.override_existing);
                assert_eq!(spec.vars.get("A"), Some(&Some("1".to_string())));
                assert_eq!(spec.vars.get("B"), Some(&None));
            }
            other => panic!("unexpected value {}", other),
        }
    }

    #[test]
    fn test_object_to_value() {
        let value = def(
            r#"
desc: Deploy the app
dep: [build, test]
task: ./deploy.sh
finally: echo done
flags: tty
arg-opts:
  target:
    type: string
    alias: t
    default: prod
"#,
        )
        .to_value("deploy")
        .unwrap();
        let TaskValue::Object(obj) = value else {
            panic!("expected an object");
        };
        assert_eq!(obj.desc.as_deref(), Some("Deploy the app"));
        assert!(obj.flags.tty);
        assert!(matches!(&obj.dep, Some(TaskValue::Array(a)) if a.len() == 2));
        assert!(matches!(&obj.task, Some(TaskValue::Name(n)) if n == "./deploy.sh"));
        let target = &obj.arg_opts["target"];
        assert_eq!(target.alias, vec!["t"]);
        assert_eq!(target.default.as_deref(), Some("prod"));
    }

    #[test]
    fn test_invalid_flags_and_option_types() {
        let err = def("exec: ls\nflags: bogus").to_value("bad").unwrap_err();
        assert!(err.to_string().contains("Unknown flag bogus"));

        let err = def("task: ls\narg-opts:\n  x:\n    type: date")
            .to_value("bad")
            .unwrap_err();
        assert!(err.to_string().contains("invalid type 'date'"));
    }

    #[test]
    fn test_references() {
        let list = def("[., a, '~$echo', [b]]");
        assert_eq!(list.references(), vec!["a"]);
        assert!(def("echo hi").references().is_empty());
    }
}
