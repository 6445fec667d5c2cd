//! Integration tests for shell tasks and their flags

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use taskstack::runner::Event;
use taskstack::task::TaskSpec;
use taskstack::{
    concurrent, exec, Orchestrator, ShellFlags, StopOnError, TaskContext, TaskError, TaskFn,
    TaskValue,
};
use tempfile::TempDir;

fn orchestrator(dir: &Path) -> Orchestrator {
    let orc = Orchestrator::new();
    orc.update_config(|c| c.working_dir = Some(dir.to_path_buf()));
    orc
}

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap().trim().to_string()
}

#[tokio::test]
async fn test_noenv_starts_from_empty_environment() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    std::env::set_var("TASKSTACK_SHELL_TEST_INHERITED", "inherited");

    let task = TaskSpec::exec(
        "echo \"[$TASKSTACK_SHELL_TEST_INHERITED][$TASKSTACK_SHELL_TEST_GIVEN]\" > env.txt",
    )
    .with_flags(ShellFlags::parse("noenv", "env").unwrap())
    .with_env("TASKSTACK_SHELL_TEST_GIVEN", "given");
    orc.load("/", vec![("env", task)]).unwrap();

    orc.run("env").await.unwrap();
    assert_eq!(read(temp_dir.path(), "env.txt"), "[][given]");
}

#[tokio::test]
async fn test_output_flags_still_run_commands() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    for flag in ["sync", "spawn", "npm", "tty"] {
        let task = exec(format!("echo {} > {}.txt", flag, flag).as_str(), flag).unwrap();
        orc.load("/", vec![(flag, task)]).unwrap();
    }

    orc.run(vec!["sync", "spawn", "npm", "tty"]).await.unwrap();
    for flag in ["sync", "spawn", "npm", "tty"] {
        assert_eq!(read(temp_dir.path(), &format!("{}.txt", flag)), flag);
    }
}

#[tokio::test]
async fn test_sync_failure_reports_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    orc.load("/", vec![("broken", exec("exit 4", "sync").unwrap())])
        .unwrap();

    let failure = orc.run("broken").await.unwrap_err();
    assert_eq!(
        failure.primary(),
        &TaskError::ShellExitNonZero {
            cmd: "exit 4".to_string(),
            code: Some(4),
        }
    );
}

#[tokio::test]
async fn test_exec_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    let task = TaskSpec::exec("sleep 5").with_timeout(Duration::from_millis(100));
    orc.load("/", vec![("slow", task)]).unwrap();

    let started = Instant::now();
    let failure = orc.run("slow").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        failure.primary(),
        &TaskError::ShellTimeout {
            cmd: "sleep 5".to_string(),
            timeout: Duration::from_millis(100),
        }
    );
    assert_eq!(orc.live_children(), 0);
}

#[tokio::test]
async fn test_full_policy_cancels_running_shell() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    assert_eq!(orc.stop_on_error(), StopOnError::Full);
    let fail = TaskFn::new(|_ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err::<(), _>(TaskError::msg("fail failed"))
    });
    orc.load(
        "/",
        vec![
            ("fail", TaskValue::from(fail)),
            ("both", concurrent(vec!["~$sleep 5", "fail"])),
        ],
    )
    .unwrap();
    let mut events = orc.events();

    let started = Instant::now();
    let failure = orc.run("both").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(failure.message(), "fail failed");
    assert_eq!(orc.live_children(), 0);

    let mut cancelled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::FailCancel { item } = event {
            cancelled.push(item.name);
        }
    }
    assert_eq!(cancelled, vec!["both.C"]);
}

#[tokio::test]
async fn test_stop_kills_live_children() {
    let temp_dir = TempDir::new().unwrap();
    let orc = orchestrator(temp_dir.path());
    let stopper = TaskFn::new(|ctx: TaskContext| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.orchestrator().stop();
        Ok::<(), TaskError>(())
    });
    orc.load(
        "/",
        vec![
            ("stopper", TaskValue::from(stopper)),
            ("both", concurrent(vec!["~$sleep 5", "stopper"])),
        ],
    )
    .unwrap();

    let started = Instant::now();
    orc.run("both").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(orc.is_stopped());
    assert_eq!(orc.live_children(), 0);
}
