//! Declarative shell and environment specs

use crate::error::{TaskError, TaskResult};
use crate::task::value::{ANON_SHELL_OPT_CLOSE, ANON_SHELL_OPT_SIG, ANON_SHELL_SIG};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Execution flags of a shell task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellFlags {
    /// Inherit the terminal for stdio
    pub tty: bool,
    /// Spawn directly instead of the relaying exec helper
    pub spawn: bool,
    /// Block the whole executor until the child exits
    pub sync: bool,
    /// Start from an empty environment
    pub noenv: bool,
    /// Treat the command as an npm invocation
    pub npm: bool,
}

const FLAG_NAMES: [&str; 5] = ["tty", "spawn", "sync", "noenv", "npm"];

impl ShellFlags {
    pub fn tty() -> Self {
        ShellFlags {
            tty: true,
            ..ShellFlags::default()
        }
    }

    /// Parse a comma separated flag list such as `tty,noenv`.
    ///
    /// `task` is only used to report an unknown flag.
    pub fn parse(flags: &str, task: &str) -> TaskResult<Self> {
        ShellFlags::from_names(
            flags.split(',').map(str::trim).filter(|f| !f.is_empty()),
            task,
        )
    }

    pub fn from_names<'a, I>(names: I, task: &str) -> TaskResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut flags = ShellFlags::default();
        for name in names {
            flags.set(name, true, task)?;
        }
        Ok(flags)
    }

    /// Build flags from a `{flag: enabled}` map
    pub fn from_map(map: &BTreeMap<String, bool>, task: &str) -> TaskResult<Self> {
        let mut flags = ShellFlags::default();
        for (name, enabled) in map {
            flags.set(name, *enabled, task)?;
        }
        Ok(flags)
    }

    fn set(&mut self, name: &str, enabled: bool, task: &str) -> TaskResult<()> {
        let slot = match name {
            "tty" => &mut self.tty,
            "spawn" => &mut self.spawn,
            "sync" => &mut self.sync,
            "noenv" => &mut self.noenv,
            "npm" => &mut self.npm,
            _ => {
                return Err(TaskError::UnknownFlag {
                    flag: name.to_string(),
                    task: task.to_string(),
                })
            }
        };
        *slot = enabled;
        Ok(())
    }

    /// Flags set in either operand
    pub fn merge(self, other: ShellFlags) -> Self {
        ShellFlags {
            tty: self.tty || other.tty,
            spawn: self.spawn || other.spawn,
            sync: self.sync || other.sync,
            noenv: self.noenv || other.noenv,
            npm: self.npm || other.npm,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ShellFlags::default()
    }

    fn enabled(&self) -> impl Iterator<Item = &'static str> + '_ {
        let values = [self.tty, self.spawn, self.sync, self.noenv, self.npm];
        FLAG_NAMES
            .into_iter()
            .zip(values)
            .filter_map(|(name, on)| on.then_some(name))
    }
}

impl fmt::Display for ShellFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.enabled().collect::<Vec<_>>().join(","))
    }
}

fn flag_block() -> &'static Regex {
    static FLAG_BLOCK: OnceLock<Regex> = OnceLock::new();
    FLAG_BLOCK.get_or_init(|| Regex::new(r"(?s)^~\(([^)]*)\)\$(.*)$").unwrap())
}

/// Split a shell string into its flags and the command to run.
///
/// Handles `~$cmd`, `~(flags)$cmd` and plain command text.
pub fn split_shell(text: &str) -> TaskResult<(ShellFlags, String)> {
    if let Some(cmd) = text.strip_prefix(ANON_SHELL_SIG) {
        return Ok((ShellFlags::default(), cmd.to_string()));
    }
    if text.starts_with(ANON_SHELL_OPT_SIG) {
        if !text.contains(ANON_SHELL_OPT_CLOSE) {
            return Err(TaskError::MissingFlagClose(text.to_string()));
        }
        let caps = flag_block()
            .captures(text)
            .ok_or_else(|| TaskError::MissingFlagClose(text.to_string()))?;
        let flags = ShellFlags::parse(&caps[1], text)?;
        return Ok((flags, caps[2].to_string()));
    }
    Ok((ShellFlags::default(), text.to_string()))
}

/// A shell command given either as one string or as words joined by spaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(String);

impl CommandLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandLine {
    fn from(cmd: &str) -> Self {
        CommandLine(cmd.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(cmd: String) -> Self {
        CommandLine(cmd)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(words: Vec<String>) -> Self {
        CommandLine(words.join(" "))
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(words: Vec<&str>) -> Self {
        CommandLine(words.join(" "))
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(words: [&str; N]) -> Self {
        CommandLine(words.join(" "))
    }
}

/// Shell execution spec
#[derive(Debug, Clone, PartialEq)]
pub struct ExecSpec {
    pub cmd: String,
    pub flags: ShellFlags,
    pub env: BTreeMap<String, String>,
    /// Wait this long before spawning
    pub delay: Duration,
    /// Kill the child and fail when it runs longer than this
    pub timeout: Option<Duration>,
}

/// Environment mutation spec
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSpec {
    /// `None` removes the variable
    pub vars: BTreeMap<String, Option<String>>,
    /// When false, variables that already exist are left alone
    pub override_existing: bool,
}

/// A declarative task: either run a shell command or mutate the environment
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    Exec(ExecSpec),
    Env(EnvSpec),
}

impl TaskSpec {
    pub fn exec(cmd: impl Into<CommandLine>) -> Self {
        TaskSpec::Exec(ExecSpec {
            cmd: cmd.into().0,
            flags: ShellFlags::default(),
            env: BTreeMap::new(),
            delay: Duration::ZERO,
            timeout: None,
        })
    }

    pub fn env<I, K>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        TaskSpec::Env(EnvSpec {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            override_existing: true,
        })
    }

    pub fn with_flags(mut self, flags: ShellFlags) -> Self {
        if let TaskSpec::Exec(spec) = &mut self {
            spec.flags = flags;
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TaskSpec::Exec(spec) = &mut self {
            spec.env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        if let TaskSpec::Exec(spec) = &mut self {
            spec.delay = delay;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let TaskSpec::Exec(spec) = &mut self {
            spec.timeout = Some(timeout);
        }
        self
    }

    /// Keep existing environment variables when applying an env spec
    pub fn keep_existing(mut self) -> Self {
        if let TaskSpec::Env(spec) = &mut self {
            spec.override_existing = false;
        }
        self
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSpec::Exec(spec) => {
                write!(f, "exec")?;
                if !spec.flags.is_empty() {
                    write!(f, "({})", spec.flags)?;
                }
                if !spec.env.is_empty() {
                    let pairs: Vec<String> =
                        spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    write!(f, " {{{}}}", pairs.join(";"))?;
                }
                write!(f, " '{}'", spec.cmd)
            }
            TaskSpec::Env(spec) => {
                let pairs: Vec<String> = spec
                    .vars
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.as_deref().unwrap_or("")))
                    .collect();
                write!(f, "env{{{}}}", pairs.join(";"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_display() {
        let spec = TaskSpec::exec("hello").with_flags(ShellFlags::tty());
        assert_eq!(spec.to_string(), "exec(tty) 'hello'");

        let spec = TaskSpec::exec("hello")
            .with_flags(ShellFlags::tty())
            .with_env("foo", "bar");
        assert_eq!(spec.to_string(), "exec(tty) {foo=bar} 'hello'");

        let spec = TaskSpec::exec(["echo", "hello"]);
        assert_eq!(spec.to_string(), "exec 'echo hello'");

        let flags = ShellFlags::from_names(["noenv", "tty"], "hello").unwrap();
        let spec = TaskSpec::exec("hello").with_flags(flags);
        assert_eq!(spec.to_string(), "exec(tty,noenv) 'hello'");
    }

    #[test]
    fn test_env_display() {
        let spec = TaskSpec::env([
            ("FOO", Some("bar".to_string())),
            ("BAR", Some("1".to_string())),
        ]);
        assert_eq!(spec.to_string(), "env{BAR=1;FOO=bar}");
    }

    #[test]
    fn test_flags_from_map() {
        let mut map = BTreeMap::new();
        map.insert("tty".to_string(), true);
        map.insert("sync".to_string(), false);
        let flags = ShellFlags::from_map(&map, "x").unwrap();
        assert!(flags.tty);
        assert!(!flags.sync);
    }

    #[test]
    fn test_unknown_flag() {
        let err = ShellFlags::parse("tty,blah", "~(tty,blah)$echo").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown flag blah in shell task: ~(tty,blah)$echo"
        );
    }

    #[test]
    fn test_split_shell() {
        let (flags, cmd) = split_shell("~$echo hi").unwrap();
        assert!(flags.is_empty());
        assert_eq!(cmd, "echo hi");

        let (flags, cmd) = split_shell("~(tty,spawn)$echo hi").unwrap();
        assert!(flags.tty && flags.spawn);
        assert_eq!(cmd, "echo hi");

        let (flags, cmd) = split_shell("echo plain").unwrap();
        assert!(flags.is_empty());
        assert_eq!(cmd, "echo plain");
    }

    #[test]
    fn test_split_shell_errors() {
        let err = split_shell("~(tty echo hi").unwrap_err();
        assert_eq!(err, TaskError::MissingFlagClose("~(tty echo hi".to_string()));

        let err = split_shell("~(foo)$echo").unwrap_err();
        assert_eq!(err.to_string(), "Unknown flag foo in shell task: ~(foo)$echo");
    }
}
