//! Task values: the closed set of shapes a task can take

use crate::error::TaskResult;
use crate::task::args::ArgOption;
use crate::task::function::TaskFn;
use crate::task::parse::{parse_array, ArrayElement};
use crate::task::spec::{ShellFlags, TaskSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Leading array element that marks a list as serial
pub const SERIAL_SIG: &str = ".";

/// Prefix of an anonymous shell string
pub const ANON_SHELL_SIG: &str = "~$";

/// Prefix of an anonymous shell string carrying a flag block, `~(tty,spawn)$cmd`
pub const ANON_SHELL_OPT_SIG: &str = "~(";

/// Terminator of the flag block
pub const ANON_SHELL_OPT_CLOSE: &str = ")$";

/// Prefix of a string that encodes a task array, `~[a, b]`
pub const STR_ARRAY_SIG: &str = "~[";

/// How the elements of an array are composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composition {
    /// Serial when the array is the top of a task, concurrent when nested
    #[default]
    Default,
    Serial,
    Concurrent,
}

/// An ordered list of task values
#[derive(Debug, Clone, Default)]
pub struct TaskArray {
    pub composition: Composition,
    pub items: Vec<TaskValue>,
}

impl TaskArray {
    /// Build an array, consuming a leading serial sentinel if present
    pub fn from_values(mut items: Vec<TaskValue>) -> Self {
        let serial = matches!(items.first(), Some(TaskValue::Name(name)) if name == SERIAL_SIG);
        if serial {
            items.remove(0);
            TaskArray {
                composition: Composition::Serial,
                items,
            }
        } else {
            TaskArray {
                composition: Composition::Default,
                items,
            }
        }
    }

    pub fn serial(items: Vec<TaskValue>) -> Self {
        let mut array = TaskArray::from_values(items);
        array.composition = Composition::Serial;
        array
    }

    pub fn concurrent(items: Vec<TaskValue>) -> Self {
        let mut array = TaskArray::from_values(items);
        array.composition = Composition::Concurrent;
        array
    }

    /// Parse the textual array form, `[a, [b, c]]`
    pub fn parse(text: &str) -> TaskResult<Self> {
        Ok(TaskArray::from_elements(parse_array(text)?))
    }

    pub fn from_elements(elements: Vec<ArrayElement>) -> Self {
        TaskArray::from_values(elements.into_iter().map(TaskValue::from).collect())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A task with optional dependency, main stage and finally stage
#[derive(Debug, Clone)]
pub struct TaskObject {
    pub desc: Option<String>,
    /// Runs once before the main stage
    pub dep: Option<TaskValue>,
    pub task: Option<TaskValue>,
    /// Runs after the main stage, whether it succeeded or not
    pub finally: Option<TaskValue>,
    /// Default shell flags merged into every shell stage
    pub flags: ShellFlags,
    /// Environment overlay for shell stages
    pub env: BTreeMap<String, String>,
    pub arg_opts: BTreeMap<String, ArgOption>,
    pub allow_unknown_options: bool,
}

impl Default for TaskObject {
    fn default() -> Self {
        TaskObject {
            desc: None,
            dep: None,
            task: None,
            finally: None,
            flags: ShellFlags::default(),
            env: BTreeMap::new(),
            arg_opts: BTreeMap::new(),
            allow_unknown_options: true,
        }
    }
}

impl TaskObject {
    pub fn new(task: impl Into<TaskValue>) -> Self {
        TaskObject {
            task: Some(task.into()),
            ..TaskObject::default()
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_dep(mut self, dep: impl Into<TaskValue>) -> Self {
        self.dep = Some(dep.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<TaskValue>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_finally(mut self, finally: impl Into<TaskValue>) -> Self {
        self.finally = Some(finally.into());
        self
    }

    pub fn with_flags(mut self, flags: ShellFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_arg_opt(mut self, option: ArgOption) -> Self {
        self.arg_opts.insert(option.name.clone(), option);
        self
    }

    /// Reject options not declared with [`TaskObject::with_arg_opt`]
    pub fn deny_unknown_options(mut self) -> Self {
        self.allow_unknown_options = false;
        self
    }
}

/// Every shape a task can take.
///
/// Strings are tagged when the value is built: a plain string is a
/// task name, while `~$cmd` and `~(flags)$cmd` are anonymous shell
/// commands. Registry entries and task object stages treat plain
/// strings as shell commands instead.
#[derive(Debug, Clone)]
pub enum TaskValue {
    Name(String),
    Shell(String),
    Function(TaskFn),
    Array(TaskArray),
    Object(Rc<TaskObject>),
    Spec(TaskSpec),
    /// Stops the whole orchestrator when reached
    Stop,
}

impl TaskValue {
    /// Short label of the value shape, used in logs and errors
    pub fn shape(&self) -> &'static str {
        match self {
            TaskValue::Name(_) => "name",
            TaskValue::Shell(_) => "shell",
            TaskValue::Function(_) => "function",
            TaskValue::Array(_) => "array",
            TaskValue::Object(_) => "object",
            TaskValue::Spec(_) => "spec",
            TaskValue::Stop => "stop",
        }
    }

    pub fn is_name(&self) -> bool {
        matches!(self, TaskValue::Name(_))
    }

    /// Description shown in task listings
    pub fn desc(&self) -> Option<String> {
        match self {
            TaskValue::Object(obj) => obj.desc.clone(),
            TaskValue::Function(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl From<&str> for TaskValue {
    fn from(text: &str) -> Self {
        if text.starts_with(ANON_SHELL_SIG) || text.starts_with(ANON_SHELL_OPT_SIG) {
            TaskValue::Shell(text.to_string())
        } else {
            TaskValue::Name(text.to_string())
        }
    }
}

impl From<String> for TaskValue {
    fn from(text: String) -> Self {
        TaskValue::from(text.as_str())
    }
}

impl From<&String> for TaskValue {
    fn from(text: &String) -> Self {
        TaskValue::from(text.as_str())
    }
}

impl<T: Into<TaskValue>> From<Vec<T>> for TaskValue {
    fn from(items: Vec<T>) -> Self {
        TaskValue::Array(TaskArray::from_values(
            items.into_iter().map(Into::into).collect(),
        ))
    }
}

impl From<TaskArray> for TaskValue {
    fn from(array: TaskArray) -> Self {
        TaskValue::Array(array)
    }
}

impl From<TaskFn> for TaskValue {
    fn from(function: TaskFn) -> Self {
        TaskValue::Function(function)
    }
}

impl From<TaskObject> for TaskValue {
    fn from(obj: TaskObject) -> Self {
        TaskValue::Object(Rc::new(obj))
    }
}

impl From<TaskSpec> for TaskValue {
    fn from(spec: TaskSpec) -> Self {
        TaskValue::Spec(spec)
    }
}

impl From<ArrayElement> for TaskValue {
    fn from(element: ArrayElement) -> Self {
        match element {
            ArrayElement::Str(text) => TaskValue::from(text),
            ArrayElement::Array(items) => TaskValue::Array(TaskArray::from_elements(items)),
        }
    }
}

impl fmt::Display for TaskArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        if self.composition == Composition::Serial {
            write!(f, "{}", SERIAL_SIG)?;
            first = false;
        }
        for item in &self.items {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
            first = false;
        }
        write!(f, "]")
    }
}

impl fmt::Display for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValue::Name(name) => write!(f, "{}", name),
            TaskValue::Shell(cmd) => write!(f, "{}", cmd),
            TaskValue::Function(_) => write!(f, "func"),
            TaskValue::Array(array) => write!(f, "{}", array),
            TaskValue::Object(obj) => match &obj.task {
                Some(task) => write!(f, "{{task: {}}}", task),
                None => write!(f, "{{}}"),
            },
            TaskValue::Spec(spec) => write!(f, "{}", spec),
            TaskValue::Stop => write!(f, "<stop>"),
        }
    }
}

/// Mark a list as serial
pub fn serial<T: Into<TaskValue>>(items: Vec<T>) -> TaskValue {
    TaskValue::Array(TaskArray::serial(
        items.into_iter().map(Into::into).collect(),
    ))
}

/// Mark a list as concurrent
pub fn concurrent<T: Into<TaskValue>>(items: Vec<T>) -> TaskValue {
    TaskValue::Array(TaskArray::concurrent(
        items.into_iter().map(Into::into).collect(),
    ))
}

/// Shorthand for an exec spec with a flag string, `exec("make", "tty")`
pub fn exec(cmd: impl Into<crate::task::spec::CommandLine>, flags: &str) -> TaskResult<TaskValue> {
    let cmd = cmd.into();
    let flags = ShellFlags::parse(flags, cmd.as_str())?;
    Ok(TaskValue::Spec(TaskSpec::exec(cmd).with_flags(flags)))
}

/// Shorthand for an env spec
pub fn env<I, K>(vars: I) -> TaskValue
where
    I: IntoIterator<Item = (K, Option<String>)>,
    K: Into<String>,
{
    TaskValue::Spec(TaskSpec::env(vars))
}
