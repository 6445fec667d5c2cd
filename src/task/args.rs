//! Option parsing for the words that follow a task name
//!
//! `foo -a=50 --bar=60 --verbose` invokes task `foo` with three options.

use crate::error::{TaskError, TaskResult};
use clap::builder::BoolishValueParser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::fmt;

/// Option value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionType {
    #[default]
    String,
    Bool,
    Integer,
    Float,
}

impl OptionType {
    /// Parse a type name as written in a task file
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(OptionType::String),
            "bool" | "boolean" => Some(OptionType::Bool),
            "int" | "integer" => Some(OptionType::Integer),
            "float" => Some(OptionType::Float),
            _ => None,
        }
    }
}

/// A declared task option
#[derive(Debug, Clone, PartialEq)]
pub struct ArgOption {
    pub name: String,
    pub alias: Vec<String>,
    pub option_type: OptionType,
    pub default: Option<String>,
    pub required: bool,
    pub usage: Option<String>,
}

impl ArgOption {
    pub fn new(name: impl Into<String>, option_type: OptionType) -> Self {
        ArgOption {
            name: name.into(),
            alias: Vec::new(),
            option_type,
            default: None,
            required: false,
            usage: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias.push(alias.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }
}

/// A parsed option value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Float(n) => Some(*n),
            ArgValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::String(s) => write!(f, "{}", s),
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Integer(n) => write!(f, "{}", n),
            ArgValue::Float(n) => write!(f, "{}", n),
        }
    }
}

/// Parsed options keyed by their declared name
pub type ArgValues = BTreeMap<String, ArgValue>;

/// Id of the catch-all for positional words, which are left to the task
const WORDS_ID: &str = "__words";

/// Clap argument for a declared option. Booleans also get a hidden
/// `--no-<name>` switch.
fn declared_args(opt: &ArgOption) -> Vec<Arg> {
    let negated = format!("no-{}", opt.name);
    let required = opt.required && opt.default.is_none();
    let mut arg = with_short_name(Arg::new(opt.name.clone()).long(opt.name.clone()), &opt.name);
    for alias in &opt.alias {
        let alias = alias.trim_start_matches('-');
        let mut chars = alias.chars();
        match (chars.next(), chars.next()) {
            (Some(short), None) => arg = arg.short(short),
            (Some(_), Some(_)) => arg = arg.visible_alias(alias.to_string()),
            _ => {}
        }
    }
    if let Some(usage) = &opt.usage {
        arg = arg.help(usage.clone());
    }
    if let Some(default) = &opt.default {
        arg = arg.default_value(default.clone());
    }

    match opt.option_type {
        OptionType::Bool => {
            arg = arg
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
                .value_parser(BoolishValueParser::new())
                .overrides_with(negated.clone());
            if required {
                arg = arg.required_unless_present(negated.clone());
            }
            let no = Arg::new(negated.clone())
                .long(negated)
                .hide(true)
                .action(ArgAction::SetTrue)
                .overrides_with(opt.name.clone());
            vec![arg, no]
        }
        OptionType::String => vec![arg.required(required)],
        OptionType::Integer => vec![arg.required(required).value_parser(value_parser!(i64))],
        OptionType::Float => vec![arg.required(required).value_parser(value_parser!(f64))],
    }
}

/// Clap argument for an option nobody declared, `--key[=value]`
fn undeclared_arg(key: &str) -> Arg {
    with_short_name(Arg::new(key.to_string()).long(key.to_string()), key)
        .num_args(0..=1)
        .require_equals(true)
        .default_missing_value("true")
}

/// One letter names work as `-k` too
fn with_short_name(arg: Arg, name: &str) -> Arg {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(short), None) => arg.short(short),
        _ => arg,
    }
}

fn build_command(
    task: &str,
    options: &BTreeMap<String, ArgOption>,
    undeclared: &[String],
) -> Command {
    let mut cmd = Command::new(task.to_string())
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new(WORDS_ID).num_args(0..).action(ArgAction::Append));
    for opt in options.values() {
        cmd = cmd.args(declared_args(opt));
    }
    cmd.args(undeclared.iter().map(|key| undeclared_arg(key)))
}

/// The option name clap reports an error against, `--count <count>` gives `count`
fn error_option(err: &clap::Error) -> Option<String> {
    let arg = match err.get(ContextKind::InvalidArg)? {
        ContextValue::String(arg) => arg.as_str(),
        ContextValue::Strings(args) => args.first()?.as_str(),
        _ => return None,
    };
    arg.trim_start_matches('-')
        .split([' ', '='])
        .next()
        .map(String::from)
}

fn option_error(task: &str, err: &clap::Error) -> TaskError {
    let option = error_option(err).unwrap_or_default();
    match err.kind() {
        ErrorKind::MissingRequiredArgument => TaskError::MissingOption {
            task: task.to_string(),
            option,
        },
        kind => {
            let reason = match err.get(ContextKind::InvalidValue) {
                Some(ContextValue::String(value)) => format!("{} '{}'", kind, value),
                _ => kind.to_string(),
            };
            TaskError::InvalidOption {
                task: task.to_string(),
                option,
                reason,
            }
        }
    }
}

fn declared_value(matches: &ArgMatches, opt: &ArgOption) -> Option<ArgValue> {
    let name = opt.name.as_str();
    match opt.option_type {
        OptionType::Bool => {
            if matches.get_flag(&format!("no-{}", name)) {
                Some(ArgValue::Bool(false))
            } else {
                matches.get_one::<bool>(name).copied().map(ArgValue::Bool)
            }
        }
        OptionType::String => matches.get_one::<String>(name).cloned().map(ArgValue::String),
        OptionType::Integer => matches.get_one::<i64>(name).copied().map(ArgValue::Integer),
        OptionType::Float => matches.get_one::<f64>(name).copied().map(ArgValue::Float),
    }
}

fn undeclared_value(key: &str, raw: &str) -> (String, ArgValue) {
    match (key.strip_prefix("no-"), raw) {
        (Some(base), "true") => (base.to_string(), ArgValue::Bool(false)),
        (_, "true") => (key.to_string(), ArgValue::Bool(true)),
        (_, "false") => (key.to_string(), ArgValue::Bool(false)),
        (_, raw) => (key.to_string(), ArgValue::String(raw.to_string())),
    }
}

/// Parse the options in `argv` (whose first word is the task name).
///
/// Words not starting with `-` are positional and left to the task.
/// Undeclared options are kept as strings, or as `true` when they carry
/// no value, unless `allow_unknown` is false.
pub fn parse_arg_opts(
    task: &str,
    argv: &[String],
    options: &BTreeMap<String, ArgOption>,
    allow_unknown: bool,
) -> TaskResult<ArgValues> {
    let words = argv.get(1..).unwrap_or_default();
    // every unknown option is learned and parsing retried, so they can all
    // be reported or kept
    let mut undeclared: Vec<String> = Vec::new();
    let matches = loop {
        match build_command(task, options, &undeclared).try_get_matches_from(words) {
            Ok(matches) => break matches,
            Err(err) if err.kind() == ErrorKind::UnknownArgument => match error_option(&err) {
                Some(key) if !key.is_empty() && !undeclared.contains(&key) => {
                    undeclared.push(key)
                }
                _ => return Err(option_error(task, &err)),
            },
            Err(err) => return Err(option_error(task, &err)),
        }
    };

    if !allow_unknown && !undeclared.is_empty() {
        return Err(TaskError::UnknownOptions {
            task: task.to_string(),
            options: undeclared,
        });
    }

    let mut values = ArgValues::new();
    for key in &undeclared {
        if let Some(raw) = matches.get_one::<String>(key) {
            let (key, value) = undeclared_value(key, raw);
            values.insert(key, value);
        }
    }
    for opt in options.values() {
        if let Some(value) = declared_value(&matches, opt) {
            values.insert(opt.name.clone(), value);
        }
    }
    Ok(values)
}
