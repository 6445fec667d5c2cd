//! Console progress output
//!
//! The reporter subscribes to orchestrator events and prints one line when
//! an item starts and one when it finishes. Nested items are indented by
//! their level, alternating the guide character between runs of lines.

use crate::runner::{Event, ExecuteKind, ItemId, ItemInfo, Observer, ObserverError};
use chrono::Local;
use colored::Colorize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::env;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only task output and errors
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

struct ReporterState {
    sep: char,
    /// Start message of each item, repeated when it finishes
    tags: HashMap<ItemId, String>,
}

pub struct ConsoleReporter {
    verbosity: Verbosity,
    cwd: Option<String>,
    state: RefCell<ReporterState>,
}

impl ConsoleReporter {
    pub fn new(verbosity: Verbosity) -> Self {
        ConsoleReporter {
            verbosity,
            cwd: env::current_dir()
                .ok()
                .map(|dir| dir.display().to_string()),
            state: RefCell::new(ReporterState {
                sep: '-',
                tags: HashMap::new(),
            }),
        }
    }

    fn log(&self, line: String) {
        let time = Local::now().format("%H:%M:%S%.3f");
        eprintln!("[{}] {}", time.to_string().dimmed(), line);
    }

    fn indent(level: usize, sep: char) -> String {
        sep.to_string().repeat(level)
    }

    /// Flip the guide character and indent for a start line
    fn start_indent(&self, level: usize) -> String {
        let mut state = self.state.borrow_mut();
        state.sep = if state.sep == '.' { '-' } else { '.' };
        Self::indent(level, state.sep)
    }

    fn dep_suffix(item: &ItemInfo) -> &'static str {
        if item.is_dep {
            "'s dependency"
        } else {
            ""
        }
    }

    fn short_cmd(&self, cmd: &str) -> String {
        match &self.cwd {
            Some(cwd) if !cwd.is_empty() => cmd.replace(cwd.as_str(), "~"),
            _ => cmd.to_string(),
        }
    }

    fn start_message(&self, item: &ItemInfo, kind: &ExecuteKind) -> Option<String> {
        let name = item.name.cyan();
        let dep = Self::dep_suffix(item);
        let msg = match kind {
            ExecuteKind::Lookup | ExecuteKind::Dep => return None,
            ExecuteKind::Shell { cmd, anonymous } => {
                let cmd = self.short_cmd(cmd);
                if *anonymous {
                    format!("Execute {}", cmd.cyan())
                } else {
                    format!("Execute {}{} {}", name, dep, cmd.blue())
                }
            }
            ExecuteKind::Function => {
                let how = if item.anonymous { " anonymous " } else { " as " };
                format!("Execute {}{}{}function", name, dep, how)
            }
            ExecuteKind::SerialArray(items) => format!(
                "Process {}{} serial array {}",
                name,
                dep,
                format!("[{}]", items.join(", ")).blue()
            ),
            ExecuteKind::ConcurrentArray(items) => format!(
                "Process {}{} concurrent array {}",
                name,
                dep,
                format!("[{}]", items.join(", ")).blue()
            ),
            ExecuteKind::Env(spec) => format!("Set {}{} {}", name, dep, spec.blue()),
        };
        Some(msg)
    }

    fn on_execute(&self, item: &ItemInfo, kind: &ExecuteKind) {
        let Some(msg) = self.start_message(item, kind) else {
            return;
        };
        let indent = self.start_indent(item.level).magenta();
        self.log(format!("{}{}", indent, msg));
        self.state.borrow_mut().tags.insert(item.id, msg);
    }

    fn on_done(&self, item: &ItemInfo, elapsed_ms: u128, error: &Option<String>) {
        let Some(msg) = self.state.borrow_mut().tags.remove(&item.id) else {
            return;
        };
        let status = if error.is_some() {
            "Failed".red()
        } else {
            "Done".green()
        };
        let indent = Self::indent(item.level, '>').magenta();
        self.log(format!(
            "{}{} {} {}",
            indent,
            status,
            msg,
            format!("({} ms)", elapsed_ms).magenta()
        ));
    }
}

impl Observer for ConsoleReporter {
    fn on_event(&self, event: &Event) -> Result<(), ObserverError> {
        if self.verbosity < Verbosity::Normal {
            return Ok(());
        }
        match event {
            Event::Execute { item, kind } => self.on_execute(item, kind),
            Event::DoneItem { item, elapsed, error } => {
                self.on_done(item, elapsed.as_millis(), error)
            }
            Event::NotFound { name } if self.verbosity >= Verbosity::Verbose => {
                self.log(format!("Optional task {} not found", name.yellow()));
            }
            Event::Search { item, namespace } if self.verbosity >= Verbosity::Verbose => {
                self.log(format!(
                    "Found {} in namespace {}",
                    item.name.cyan(),
                    namespace.magenta()
                ));
            }
            Event::FailCancel { item } => {
                self.log(format!("Cancelled {} after failure", item.name.yellow()));
            }
            _ => {}
        }
        Ok(())
    }
}
