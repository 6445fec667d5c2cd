//! Integration tests for task execution

mod common;

use common::Log;
use std::cell::Cell;
use std::fs;
use std::rc::Rc;
use std::time::Duration;
use taskstack::runner::{Event, ExecuteKind};
use taskstack::task::{TaskArray, TaskSpec};
use taskstack::{
    concurrent, Orchestrator, StopOnError, TaskContext, TaskError, TaskFn, TaskObject, TaskValue,
};
use tempfile::TempDir;

fn failing(message: &'static str) -> TaskValue {
    TaskFn::sync(move |_ctx| Err::<(), _>(TaskError::msg(message))).into()
}

fn sleeping(log: &Log, label: &'static str, ms: u64) -> TaskValue {
    let log = log.clone();
    TaskFn::new(move |_ctx: TaskContext| {
        let log = log.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            log.push(label);
            Ok::<(), TaskError>(())
        }
    })
    .into()
}

fn orchestrator(log: &Log) -> Orchestrator {
    let orc = Orchestrator::new();
    orc.load(
        "/",
        vec![
            ("a", log.task("a")),
            ("b", log.task("b")),
            ("c", log.task("c")),
            ("fail", failing("fail failed")),
        ],
    )
    .unwrap();
    orc
}

#[tokio::test]
async fn test_run_serial_order() {
    let log = Log::new();
    let orc = orchestrator(&log);

    orc.run(vec!["a", "b", "c"]).await.unwrap();
    assert_eq!(log.entries(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_run_concurrent_array() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.load(
        "/",
        vec![
            ("slow", sleeping(&log, "slow", 40)),
            ("fast", log.task("fast")),
            ("both", concurrent(vec!["slow", "fast"])),
        ],
    )
    .unwrap();

    orc.run("both").await.unwrap();
    assert_eq!(log.entries(), vec!["fast", "slow"]);
}

#[tokio::test]
async fn test_nested_registry_array_is_concurrent() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let nested = TaskValue::from(vec![
        TaskValue::from("a"),
        TaskValue::from(vec!["slow", "b"]),
        TaskValue::from("c"),
    ]);
    orc.load(
        "/",
        vec![("slow", sleeping(&log, "slow", 40)), ("all", nested)],
    )
    .unwrap();

    orc.run("all").await.unwrap();
    assert_eq!(log.entries(), vec!["a", "b", "slow", "c"]);
}

#[tokio::test]
async fn test_concurrent_failures_are_aggregated() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::None);
    orc.load(
        "/",
        vec![
            ("x", failing("x failed")),
            ("y", failing("y failed")),
            ("all", concurrent(vec!["x", "b", "y"])),
        ],
    )
    .unwrap();

    let failure = orc.run("all").await.unwrap_err();
    assert_eq!(failure.message(), "x failed");
    assert_eq!(failure.more(), vec!["y failed".to_string()]);
    assert_eq!(log.entries(), vec!["b"]);
}

#[tokio::test]
async fn test_optional_missing_task() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let mut events = orc.events();

    orc.run(vec!["?missing", "a"]).await.unwrap();
    assert_eq!(log.entries(), vec!["a"]);

    let mut not_found = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::NotFound { name } = event {
            not_found.push(name);
        }
    }
    assert_eq!(not_found, vec!["?missing"]);
}

#[tokio::test]
async fn test_missing_task_fails() {
    let log = Log::new();
    let orc = orchestrator(&log);

    let failure = orc.run("nope").await.unwrap_err();
    assert_eq!(failure.primary().missing_task(), Some("nope"));
    let report = orc.failure_report(&failure);
    assert_eq!(report[1], " 1  Task nope not found");
}

#[tokio::test]
async fn test_soft_stop_skips_queued_tasks() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::Soft);

    let failure = orc.run(vec!["a", "fail", "b"]).await.unwrap_err();
    assert_eq!(failure.message(), "fail failed");
    assert_eq!(log.entries(), vec!["a"]);
}

#[tokio::test]
async fn test_no_stop_runs_everything() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::None);

    let result = orc.run(vec!["a", "fail", "b"]).await;
    assert!(result.is_err());
    assert_eq!(log.entries(), vec!["a", "b"]);
    assert_eq!(orc.default_done(&result), 0);
}

#[tokio::test]
async fn test_full_stop_cancels_running_functions() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.load(
        "/",
        vec![
            ("sleepy", sleeping(&log, "sleepy", 500)),
            ("both", concurrent(vec!["sleepy", "fail"])),
        ],
    )
    .unwrap();
    let mut events = orc.events();

    assert!(orc.run("both").await.is_err());
    assert!(log.entries().is_empty());

    let mut cancelled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::FailCancel { item } = event {
            cancelled.push(item.name);
        }
    }
    assert_eq!(cancelled, vec!["sleepy"]);
}

#[tokio::test]
async fn test_finally_runs_once_after_failure() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::Soft);

    let seen_err = Rc::new(Cell::new(false));
    let cleanup = {
        let log = log.clone();
        let seen = seen_err.clone();
        TaskFn::sync(move |ctx| {
            seen.set(ctx.err() == Some("boom"));
            log.push("cleanup");
            Ok(())
        })
    };
    let task = TaskObject::new(failing("boom")).with_finally(cleanup);
    orc.load("/", vec![("guarded", task)]).unwrap();

    let failure = orc.run("guarded").await.unwrap_err();
    assert_eq!(failure.message(), "boom");
    assert_eq!(log.entries(), vec!["cleanup"]);
    assert!(seen_err.get());
}

#[tokio::test]
async fn test_dependencies_run_first() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let task = TaskObject::new(log.task("main")).with_dep(vec!["a", "b"]);
    orc.load("/", vec![("build", task)]).unwrap();

    orc.run("build").await.unwrap();
    assert_eq!(log.entries(), vec!["a", "b", "main"]);
}

#[tokio::test]
async fn test_function_follow_ons() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let finished = Rc::new(Cell::new(false));
    let flag = finished.clone();
    let outer = TaskFn::sync(move |ctx| {
        let flag = flag.clone();
        ctx.run("a");
        ctx.run_then("b", move |failed, _elapsed| flag.set(!failed));
        Ok("c")
    });
    orc.load("/", vec![("outer", outer)]).unwrap();

    orc.run("outer").await.unwrap();
    assert_eq!(log.entries(), vec!["a", "b", "c"]);
    assert!(finished.get());
}

#[tokio::test]
async fn test_function_reads_arg_opts() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let greet = {
        let log = log.clone();
        TaskFn::sync(move |ctx| {
            let name = ctx.arg("name").and_then(|v| v.as_str()).unwrap_or("nobody");
            log.push(format!("hello {}", name));
            Ok(())
        })
    };
    orc.load("/", vec![("greet", greet)]).unwrap();

    orc.run("greet --name=bob").await.unwrap();
    assert_eq!(log.entries(), vec!["hello bob"]);
}

#[tokio::test]
async fn test_panicking_function_fails_run() {
    let orc = Orchestrator::new();
    let bad = TaskFn::sync(|_ctx| -> Result<(), TaskError> { panic!("kaboom") });
    orc.load("/", vec![("bad", bad)]).unwrap();

    let failure = orc.run("bad").await.unwrap_err();
    assert!(matches!(
        failure.primary(),
        TaskError::FunctionPanic { name, message } if name == "bad" && message == "kaboom"
    ));
}

#[tokio::test]
async fn test_namespace_override() {
    let log = Log::new();
    let orc = Orchestrator::new();
    orc.load("base", vec![("hello", log.task("base"))]).unwrap();
    orc.load_overriding("local", &["base"], vec![("hello", log.task("local"))])
        .unwrap();

    orc.run("hello").await.unwrap();
    orc.run("base/hello").await.unwrap();
    assert_eq!(log.entries(), vec!["local", "base"]);
}

#[tokio::test]
async fn test_stop_skips_remaining_work() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let target = TaskArray::serial(vec![
        TaskValue::from("a"),
        TaskValue::Stop,
        TaskValue::from("b"),
    ]);

    orc.run(target).await.unwrap();
    assert_eq!(log.entries(), vec!["a"]);
    assert!(orc.is_stopped());
}

#[tokio::test]
async fn test_run_events() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let mut events = orc.events();

    orc.run(vec!["a", "b"]).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(matches!(&received[0], Event::Run { target } if target == "[a, b]"));
    assert!(received.iter().any(|e| matches!(
        e,
        Event::Execute { kind: ExecuteKind::SerialArray(items), .. } if items == &["a", "b"]
    )));
    let done: Vec<_> = received
        .iter()
        .filter_map(|e| match e {
            Event::DoneItem { item, error, .. } => Some((item.name.clone(), error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(done.last(), Some(&("run".to_string(), None)));
    assert_eq!(done.len(), 3);
}

#[tokio::test]
async fn test_shell_error_handed_to_finally() {
    let temp_dir = TempDir::new().unwrap();
    let orc = Orchestrator::new();
    orc.set_stop_on_error(StopOnError::Soft);
    orc.update_config(|c| c.working_dir = Some(temp_dir.path().to_path_buf()));
    let task = TaskObject::new("exit 3")
        .with_finally("echo \"$TASKSTACK_ERR|$TASKSTACK_FAILED\" > finally.txt");
    orc.load("/", vec![("guarded", task)]).unwrap();

    let failure = orc.run("guarded").await.unwrap_err();
    assert_eq!(failure.message(), "cmd \"exit 3\" exit code 3");

    let output = fs::read_to_string(temp_dir.path().join("finally.txt")).unwrap();
    assert_eq!(output.trim(), "cmd \"exit 3\" exit code 3|true");
}

#[tokio::test]
async fn test_anonymous_shell_in_run_array() {
    let temp_dir = TempDir::new().unwrap();
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.update_config(|c| c.working_dir = Some(temp_dir.path().to_path_buf()));

    orc.run(vec!["a", "~$echo hi > anon.txt"]).await.unwrap();
    let output = fs::read_to_string(temp_dir.path().join("anon.txt")).unwrap();
    assert_eq!(output.trim(), "hi");
    assert_eq!(log.entries(), vec!["a"]);
}

#[tokio::test]
async fn test_finally_not_cancelled_under_full() {
    let log = Log::new();
    let orc = orchestrator(&log);
    assert_eq!(orc.stop_on_error(), StopOnError::Full);

    let task = TaskObject::new(failing("boom")).with_finally(sleeping(&log, "cleanup", 150));
    orc.load("/", vec![("guarded", task)]).unwrap();

    assert!(orc.run("guarded").await.is_err());
    assert_eq!(log.entries(), vec!["cleanup"]);
}

#[tokio::test]
async fn test_env_stage_runs_finally() {
    let log = Log::new();
    let orc = orchestrator(&log);
    let key = "TASKSTACK_EXEC_TEST_ENV_STAGE";
    let task = TaskObject::new(TaskSpec::env([(key, Some("set".to_string()))]))
        .with_finally(log.task("after"));
    orc.load("/", vec![("setup", task)]).unwrap();

    orc.run("setup").await.unwrap();
    assert_eq!(std::env::var(key).unwrap(), "set");
    assert_eq!(log.entries(), vec!["after"]);
}

#[tokio::test]
async fn test_finally_runs_when_stage_fails_to_parse() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::None);
    orc.load(
        "/",
        vec![
            (
                "bad-flag",
                TaskObject::new("~(bogus)$echo hi").with_finally(log.task("flag cleanup")),
            ),
            (
                "bad-array",
                TaskObject::new("~[a, [b").with_finally(log.task("array cleanup")),
            ),
        ],
    )
    .unwrap();

    let failure = orc.run(vec!["bad-flag", "bad-array"]).await.unwrap_err();
    assert_eq!(failure.message(), "Unknown flag bogus in shell task: ~(bogus)$echo hi");
    assert_eq!(failure.len(), 2);
    assert_eq!(log.entries(), vec!["flag cleanup", "array cleanup"]);
}

#[tokio::test]
async fn test_panicking_observer_fails_run() {
    let log = Log::new();
    let orc = orchestrator(&log);
    orc.set_stop_on_error(StopOnError::None);
    orc.subscribe(|event: &Event| -> Result<(), taskstack::runner::ObserverError> {
        if matches!(event, Event::Run { .. }) {
            panic!("listener broke");
        }
        Ok(())
    });

    let failure = orc.run("a").await.unwrap_err();
    assert_eq!(
        failure.primary(),
        &TaskError::Listener("observer panicked: listener broke".to_string())
    );
    assert_eq!(log.entries(), vec!["a"]);
}

#[tokio::test]
async fn test_function_returning_plain_value() {
    let orc = Orchestrator::new();
    let answer = TaskFn::sync(|_ctx| Ok(42_i64));
    orc.load("/", vec![("answer", answer)]).unwrap();
    let mut events = orc.events();

    orc.run("answer").await.unwrap();
    let mut done = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::DoneItem { item, .. } = event {
            done.push(item.name);
        }
    }
    assert_eq!(done, vec!["answer"]);
}
