//! Shell command execution
//!
//! Commands run through the configured interpreter (`sh -c` by default).
//! Output handling follows the task's flags:
//! - `tty`: the child inherits the terminal
//! - `spawn`: output is discarded
//! - otherwise output is piped and relayed to our stdout and stderr
//!
//! Every running child is registered so [`Orchestrator::stop`] can
//! terminate it.

use crate::error::{TaskError, TaskResult};
use crate::runner::events::{Event, ItemInfo};
use crate::runner::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::task::ShellFlags;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::debug;

/// A resolved shell invocation
#[derive(Debug, Clone)]
pub(crate) struct ShellJob {
    pub cmd: String,
    pub flags: ShellFlags,
    /// Overlay applied on top of the inherited (or empty) environment
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Live child processes, keyed by a token unique per orchestrator
#[derive(Debug, Default)]
pub struct ChildRegistry {
    next_token: u64,
    live: HashMap<u64, LiveChild>,
}

#[derive(Debug)]
struct LiveChild {
    cmd: String,
    kill: oneshot::Sender<()>,
}

impl ChildRegistry {
    pub(crate) fn register(&mut self, cmd: &str) -> (u64, oneshot::Receiver<()>) {
        let token = self.next_token;
        self.next_token += 1;
        let (kill, rx) = oneshot::channel();
        self.live.insert(
            token,
            LiveChild {
                cmd: cmd.to_string(),
                kill,
            },
        );
        (token, rx)
    }

    pub(crate) fn remove(&mut self, token: u64) {
        self.live.remove(&token);
    }

    /// Signal every live child to terminate; returns how many were signalled
    pub(crate) fn kill_all(&mut self) -> usize {
        let count = self.live.len();
        for (_, child) in self.live.drain() {
            debug!(cmd = %child.cmd, "stopping child process");
            let _ = child.kill.send(());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Stopped,
    Cancelled,
    TimedOut,
}

fn build_command(config: &OrchestratorConfig, job: &ShellJob) -> TaskResult<StdCommand> {
    let (program, args) = config
        .interpreter
        .split_first()
        .ok_or_else(|| TaskError::Spawn {
            cmd: job.cmd.clone(),
            reason: "no interpreter configured".to_string(),
        })?;

    let mut command = StdCommand::new(program);
    command.args(args).arg(&job.cmd);

    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    if job.flags.noenv {
        command.env_clear();
    }
    command.envs(&job.env);

    if job.flags.tty || job.flags.npm {
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
    } else if job.flags.spawn || job.flags.sync {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    } else {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    }
    Ok(command)
}

/// Run a shell job to completion for the item described by `item`
pub(crate) async fn run(orc: &Orchestrator, item: &ItemInfo, job: ShellJob) -> TaskResult<()> {
    let config = orc.config();
    let command = build_command(&config, &job)?;
    let spawn_err = |e: io::Error| TaskError::Spawn {
        cmd: job.cmd.clone(),
        reason: e.to_string(),
    };

    if job.flags.sync {
        debug!(cmd = %job.cmd, "running blocking shell command");
        let mut command = command;
        let status = command.status().map_err(spawn_err)?;
        return check_status(&job.cmd, status);
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    let mut child = command.spawn().map_err(spawn_err)?;
    debug!(cmd = %job.cmd, pid = ?child.id(), "spawned shell command");

    let (token, kill) = orc.children_mut().register(&job.cmd);
    // finally stages run to completion even after a failure
    let outcome = supervise(orc, &mut child, kill, job.timeout, !item.is_finally).await;
    orc.children_mut().remove(token);

    match outcome {
        Outcome::Exited(status) => check_status(&job.cmd, status.map_err(spawn_err)?),
        Outcome::Stopped => {
            reap(&mut child).await;
            Ok(())
        }
        Outcome::Cancelled => {
            reap(&mut child).await;
            orc.emit(Event::FailCancel { item: item.clone() });
            Ok(())
        }
        Outcome::TimedOut => {
            reap(&mut child).await;
            Err(TaskError::ShellTimeout {
                cmd: job.cmd.clone(),
                timeout: job.timeout.unwrap_or_default(),
            })
        }
    }
}

async fn supervise(
    orc: &Orchestrator,
    child: &mut Child,
    kill: oneshot::Receiver<()>,
    timeout: Option<Duration>,
    cancel_on_failure: bool,
) -> Outcome {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let relay = async {
        let out = async {
            if let Some(mut pipe) = stdout {
                let _ = tokio::io::copy(&mut pipe, &mut tokio::io::stdout()).await;
            }
        };
        let err = async {
            if let Some(mut pipe) = stderr {
                let _ = tokio::io::copy(&mut pipe, &mut tokio::io::stderr()).await;
            }
        };
        tokio::join!(out, err);
    };
    let wait = async {
        let (status, _) = tokio::join!(child.wait(), relay);
        status
    };
    let failed = async {
        if cancel_on_failure {
            orc.watch_failure().await
        } else {
            futures::future::pending::<()>().await
        }
    };
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => futures::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = wait => Outcome::Exited(status),
        _ = kill => Outcome::Stopped,
        _ = failed => Outcome::Cancelled,
        _ = deadline => Outcome::TimedOut,
    }
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "child already exited");
    }
    let _ = child.wait().await;
}

fn check_status(cmd: &str, status: ExitStatus) -> TaskResult<()> {
    if status.success() || terminated_by_sigterm(&status) {
        return Ok(());
    }
    Err(TaskError::ShellExitNonZero {
        cmd: cmd.to_string(),
        code: status.code(),
    })
}

#[cfg(unix)]
fn terminated_by_sigterm(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(15)
}

#[cfg(not(unix))]
fn terminated_by_sigterm(_status: &ExitStatus) -> bool {
    false
}
