//! Main CLI application

use crate::cli::reporter::{ConsoleReporter, Verbosity};
use crate::config::{
    find_config_file_from, find_config_file_in, load_config, load_manifest, parse_config_file,
    validate_config, TaskFile,
};
use crate::error::{ConfigError, TaskResult};
use crate::runner::{Orchestrator, StopOnError};
use crate::task::{TaskArray, TaskValue};
use anyhow::Context as _;
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::env;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

const BIN_NAME: &str = "taskstack";

/// Build the clap command. Options end at the first task word; that
/// word and everything after it are task words.
pub fn build_command() -> Command {
    Command::new(BIN_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run tasks composed of shell commands and serial or concurrent task lists")
        .override_usage(format!("{} [options] [--] [task1 [task options] task2 ...]", BIN_NAME))
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the taskstack.yml file"),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory to look for taskstack.yml (default is CWD)"),
        )
        .arg(
            Arg::new("cwd")
                .short('w')
                .long("cwd")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Set the working directory, disables searching up for taskstack.yml"),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .value_name("NAMESPACES")
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("")
                .help("List task names, optionally from comma separated namespaces"),
        )
        .arg(
            Arg::new("full")
                .long("full")
                .action(ArgAction::SetTrue)
                .help("With --list, show task names with their namespace"),
        )
        .arg(
            Arg::new("ns")
                .short('m')
                .long("ns")
                .action(ArgAction::SetTrue)
                .help("List all namespaces in search order"),
        )
        .arg(
            Arg::new("soe")
                .short('e')
                .long("soe")
                .value_name("POLICY")
                .default_value("full")
                .value_parser(StopOnError::from_str)
                .help("Stop on errors - one of: no, soft, full"),
        )
        .arg(
            Arg::new("serial")
                .short('s')
                .long("serial")
                .action(ArgAction::SetTrue)
                .help("Execute tasks from the command line serially"),
        )
        .arg(
            Arg::new("no-npm")
                .long("no-npm")
                .action(ArgAction::SetTrue)
                .help("Do not load package.json scripts into namespace npm"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .help("Only print command output and errors"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Print verbose output"),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .value_parser(value_parser!(Shell))
                .help("Print a shell completion script"),
        )
        .arg(
            Arg::new("tasks")
                .value_name("TASKS")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .help("Tasks to run, each followed by its own options"),
        )
}

/// The task words from the command line
fn task_words(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("tasks")
        .map(|words| words.cloned().collect())
        .unwrap_or_default()
}

/// Group task words: each word not starting with `-` begins a new task and
/// the options after it belong to that task
fn group_tasks(words: &[String]) -> Vec<String> {
    let mut tasks: Vec<Vec<&str>> = Vec::new();
    for word in words {
        match tasks.last_mut() {
            Some(task) if word.starts_with('-') => task.push(word.as_str()),
            _ => tasks.push(vec![word.as_str()]),
        }
    }
    tasks
        .into_iter()
        .map(|words| {
            let task = words.join(" ");
            // `/ns/name` is the same as `ns/name`
            match task.strip_prefix('/') {
                Some(rest) if rest.find('/').is_some_and(|i| i > 0) => rest.to_string(),
                _ => task,
            }
        })
        .collect()
}

/// The value to run for the tasks named on the command line
pub fn target_from_tasks(tasks: Vec<String>, serial: bool) -> TaskResult<TaskValue> {
    let mut items = if tasks.first().is_some_and(|t| t.starts_with('[')) {
        TaskArray::parse(&tasks.join(" "))?.items
    } else {
        tasks.into_iter().map(TaskValue::from).collect()
    };
    if items.len() == 1 {
        return Ok(items.remove(0));
    }
    let array = if serial {
        TaskArray::serial(items)
    } else {
        TaskArray::from_values(items)
    };
    Ok(TaskValue::Array(array))
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

fn describe(value: &TaskValue) -> (String, Option<String>) {
    let line = match value {
        TaskValue::Name(text) | TaskValue::Shell(text) => text.magenta().to_string(),
        TaskValue::Array(array) => array.to_string().green().to_string(),
        TaskValue::Function(_) => "function".to_string(),
        TaskValue::Spec(spec) => spec.to_string().blue().to_string(),
        TaskValue::Stop => "stop".red().to_string(),
        TaskValue::Object(obj) => {
            let desc = match &obj.desc {
                Some(desc) => desc.yellow().to_string(),
                None => value.to_string().dimmed().to_string(),
            };
            let mut detail = Vec::new();
            if let Some(task) = &obj.task {
                detail.push(format!("tasks: {}", task).dimmed().green().to_string());
            }
            if let Some(dep) = &obj.dep {
                detail.push(format!("deps: {}", dep).dimmed().cyan().to_string());
            }
            let detail = (!detail.is_empty()).then(|| detail.join("\n"));
            return (desc, detail);
        }
    };
    (line, None)
}

/// Print every namespace's tasks with what they run
pub fn print_tasks(orc: &Orchestrator, config: Option<&TaskFile>) {
    if let Some(config) = config {
        if let Some(name) = &config.name {
            println!("{}", name.bold());
        }
        if let Some(usage) = &config.usage {
            println!("{}", usage);
        }
        println!();
    }

    let registry = orc.registry();
    for namespace in registry.namespaces() {
        let mut entries: Vec<_> = registry
            .entries(&namespace)
            .into_iter()
            .filter(|(name, _)| !name.starts_with('.'))
            .map(|(name, value)| (name, describe(value)))
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|a, b| a.0.cmp(b.0));

        println!("{}", format!("Namespace '{}'", namespace).bold().red().reversed());
        let width = 2 + entries.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        for (i, (name, (line, detail))) in entries.iter().enumerate() {
            let guide = if i % 2 == 0 { "." } else { "-" };
            let padded = format!("  {} {}", name, guide.repeat(width.saturating_sub(name.len()).max(1)));
            let padded = if i % 2 == 0 { padded.cyan() } else { padded.blue() };
            println!("{} {}", padded, line);
            if let Some(detail) = detail {
                for row in detail.lines() {
                    println!("{}  {}", " ".repeat(width + 3), row);
                }
            }
        }
        println!();
    }
}

fn change_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    env::set_current_dir(dir)
        .with_context(|| format!("Failed to change directory to {}", dir.display()))?;
    let cwd = env::current_dir()?;
    debug!(cwd = %cwd.display(), "working directory changed");
    Ok(cwd)
}

/// Locate the task file: `--file`, else `--dir` or the CWD, searching up
/// unless `--cwd` was given
fn locate_task_file(matches: &ArgMatches, cwd: &Path, search: bool) -> anyhow::Result<Option<PathBuf>> {
    if let Some(file) = matches.get_one::<PathBuf>("file") {
        let path = cwd.join(file);
        if !path.is_file() {
            anyhow::bail!("Task file {} not found", path.display());
        }
        return Ok(Some(path));
    }

    let dir = match matches.get_one::<PathBuf>("dir") {
        Some(dir) => cwd.join(dir),
        None => cwd.to_path_buf(),
    };
    let found = if search {
        find_config_file_from(dir)
    } else {
        find_config_file_in(&dir)
    };
    match found {
        Ok(path) => Ok(Some(path)),
        Err(ConfigError::NotFound(searched)) => {
            debug!(searched = %searched, "no task file");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn load_dotenv(dir: &Path) {
    let path = dir.join(".env");
    match dotenvy::from_path(&path) {
        Ok(()) => debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to load environment file"),
    }
}

/// Run the CLI application with the process arguments
pub async fn run() -> anyhow::Result<i32> {
    run_from(env::args().skip(1).collect()).await
}

/// Run the CLI application with arguments (not including the program name)
pub async fn run_from(args: Vec<String>) -> anyhow::Result<i32> {
    let matches = build_command().get_matches_from(iter::once(BIN_NAME.to_string()).chain(args));

    if let Some(shell) = matches.get_one::<Shell>("completions").copied() {
        clap_complete::generate(shell, &mut build_command(), BIN_NAME, &mut io::stdout());
        return Ok(0);
    }
    let verbosity = get_verbosity(&matches);

    let (mut cwd, search) = match matches.get_one::<PathBuf>("cwd") {
        Some(dir) => (change_dir(dir)?, false),
        None => (env::current_dir()?, true),
    };

    let task_file = locate_task_file(&matches, &cwd, search)?;
    if let Some(path) = &task_file {
        // tasks run from the directory of the task file that was found
        if search && !matches.contains_id("file") {
            if let Some(dir) = path.parent() {
                if dir != cwd {
                    cwd = change_dir(dir)?;
                }
            }
        }
    } else if verbosity >= Verbosity::Normal {
        eprintln!("No {} found in {}", "taskstack.yml".green(), cwd.display());
    }
    load_dotenv(&cwd);

    let orc = Orchestrator::new();
    orc.update_config(|c| c.working_dir = Some(cwd.clone()));

    let config = match &task_file {
        Some(path) => {
            let config = parse_config_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            validate_config(&config)?;
            load_config(&orc, &config)?;
            Some(config)
        }
        None => None,
    };
    for loaded in load_manifest(&orc, &cwd, !matches.get_flag("no-npm"))? {
        debug!(namespace = %loaded.namespace, count = loaded.count, "loaded package.json tasks");
    }

    let soe_given = matches.value_source("soe") == Some(ValueSource::CommandLine);
    let file_policy = config.as_ref().and_then(|c| c.stop_on_error);
    if soe_given || file_policy.is_none() {
        if let Some(policy) = matches.get_one::<StopOnError>("soe") {
            orc.set_stop_on_error(*policy);
        }
    }

    if let Some(list) = matches.get_one::<String>("list") {
        let namespaces: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .collect();
        let only = (!namespaces.is_empty()).then_some(namespaces.as_slice());
        let registry = orc.registry();
        let names = if matches.get_flag("full") {
            registry.full_names(only)
        } else {
            registry.names(only)
        };
        println!("{}", names.join("\n"));
        return Ok(0);
    }
    if matches.get_flag("ns") {
        println!("{}", orc.registry().namespaces().join("\n"));
        return Ok(0);
    }

    let tasks = group_tasks(&task_words(&matches));
    if tasks.is_empty() || orc.count_tasks() == 0 {
        if orc.count_tasks() == 0 {
            eprintln!("{}", "*** No tasks found ***".red());
        } else {
            print_tasks(&orc, config.as_ref());
        }
        if verbosity >= Verbosity::Normal {
            println!("{} {} -h  {} {} build", "Help:".bold(), BIN_NAME, "Example:".bold(), BIN_NAME);
        }
        return Ok(1);
    }

    let target = match target_from_tasks(tasks.clone(), matches.get_flag("serial")) {
        Ok(target) => target,
        Err(e) => {
            eprintln!(
                "Parsing array of tasks failed: {} {}",
                e.to_string().red(),
                tasks.join(" ").cyan()
            );
            return Ok(1);
        }
    };

    orc.subscribe(ConsoleReporter::new(verbosity));
    let result = orc.run(target).await;
    Ok(orc.default_done(&result))
}
