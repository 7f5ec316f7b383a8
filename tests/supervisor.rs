#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use jobdag::engine::terminal_status;
use jobdag::errors::JobdagError;
use jobdag::exec::{ProcessEvent, ProcessExit, ProcessRegistry, Supervisor, TerminationPolicy};
use jobdag::types::{JobStatus, OutputStream};

type TestResult = Result<(), Box<dyn Error>>;

struct Collected {
    lines: Vec<(OutputStream, String)>,
    exit: ProcessExit,
}

/// Read events for `job` until its exit arrives.
async fn collect(rx: &mut mpsc::Receiver<ProcessEvent>, job: &str) -> Collected {
    let mut lines = Vec::new();
    loop {
        match rx.recv().await.expect("event channel closed") {
            ProcessEvent::Output {
                job_id,
                stream,
                content,
                ..
            } if job_id == job => lines.push((stream, content)),
            ProcessEvent::Exited { job_id, exit, .. } if job_id == job => {
                return Collected { lines, exit };
            }
            _ => {}
        }
    }
}

fn supervisor() -> (Supervisor, mpsc::Receiver<ProcessEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let sup = Supervisor::new(ProcessRegistry::new(), tx).with_drain_timeout(Duration::from_millis(200));
    (sup, rx)
}

#[tokio::test]
async fn streams_both_pipes_in_order_and_reports_exit_code() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    sup.start(
        "job",
        "echo one; echo oops >&2; echo two; exit 3",
        Path::new("/"),
        TerminationPolicy::default(),
    )?;
    let out = with_timeout(collect(&mut rx, "job")).await;

    let stdout: Vec<_> = out
        .lines
        .iter()
        .filter(|(s, _)| *s == OutputStream::Stdout)
        .map(|(_, l)| l.as_str())
        .collect();
    assert_eq!(stdout, vec!["one", "two"]);
    assert!(out.lines.contains(&(OutputStream::Stderr, "oops".to_string())));
    assert_eq!(out.exit.code, Some(3));
    assert_eq!(terminal_status(&out.exit), JobStatus::Error);
    Ok(())
}

#[tokio::test]
async fn duplicate_start_is_rejected_without_replacing_the_handle() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    let run_id = sup.start("job", "sleep 5", Path::new("/"), TerminationPolicy::default())?;
    let err = sup
        .start("job", "echo again", Path::new("/"), TerminationPolicy::default())
        .unwrap_err();

    assert!(matches!(err, JobdagError::AlreadyRunning(_)));
    assert_eq!(sup.registry().current_run("job"), Some(run_id));

    assert!(sup.stop("job"));
    let out = with_timeout(collect(&mut rx, "job")).await;
    assert_eq!(terminal_status(&out.exit), JobStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn missing_working_directory_fails_before_spawn() {
    init_tracing();
    let (sup, _rx) = supervisor();

    let err = sup
        .start(
            "job",
            "echo hi",
            Path::new("/definitely/not/here"),
            TerminationPolicy::default(),
        )
        .unwrap_err();

    assert!(matches!(err, JobdagError::Validation(_)));
    assert!(!sup.is_running("job"));
}

#[tokio::test]
async fn output_printed_while_stopping_is_not_lost() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    sup.start(
        "job",
        "trap 'echo summary; exit 0' INT; echo ready; while true; do sleep 0.05; done",
        Path::new("/"),
        TerminationPolicy::interrupt(Duration::from_secs(5)),
    )?;

    // Wait until the trap is installed.
    match with_timeout(rx.recv()).await {
        Some(ProcessEvent::Output { content, .. }) => assert_eq!(content, "ready"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(sup.stop("job"));

    let out = with_timeout(collect(&mut rx, "job")).await;
    assert!(out.lines.iter().any(|(_, l)| l == "summary"));
    assert!(out.exit.stop_requested);
    assert_eq!(terminal_status(&out.exit), JobStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn ignored_termination_escalates_to_kill() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    sup.start(
        "job",
        "trap '' TERM; echo ready; while true; do sleep 0.05; done",
        Path::new("/"),
        TerminationPolicy::terminate(Duration::from_millis(200)),
    )?;
    let _ = with_timeout(rx.recv()).await;

    assert!(sup.stop("job"));
    let out = with_timeout(collect(&mut rx, "job")).await;

    assert_eq!(out.exit.signal, Some(libc::SIGKILL));
    assert_eq!(terminal_status(&out.exit), JobStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn stop_without_a_process_returns_false() {
    let (sup, _rx) = supervisor();
    assert!(!sup.stop("nothing"));
}

#[tokio::test]
async fn slow_consumer_still_receives_every_line() -> TestResult {
    init_tracing();
    let (tx, mut rx) = mpsc::channel(4);
    let sup = Supervisor::new(ProcessRegistry::new(), tx).with_drain_timeout(Duration::from_millis(50));

    sup.start("job", "seq 1 2000", Path::new("/"), TerminationPolicy::default())?;
    // The process finishes long before anyone reads the channel.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let out = with_timeout(collect(&mut rx, "job")).await;
    assert_eq!(out.lines.len(), 2000);
    assert_eq!(out.lines[0].1, "1");
    assert_eq!(out.lines[1999].1, "2000");
    assert_eq!(out.exit.code, Some(0));
    Ok(())
}

#[tokio::test]
async fn background_child_holding_the_pipe_does_not_delay_exit() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    let started = Instant::now();
    sup.start("job", "sleep 5 & echo done", Path::new("/"), TerminationPolicy::default())?;
    let out = with_timeout(collect(&mut rx, "job")).await;

    assert_eq!(out.lines, vec![(OutputStream::Stdout, "done".to_string())]);
    assert_eq!(out.exit.code, Some(0));
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn stop_terminates_background_grandchildren() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("marker");

    sup.start(
        "job",
        &format!("(sleep 1; touch '{}') & echo ready; sleep 30", marker.display()),
        Path::new("/"),
        TerminationPolicy::default(),
    )?;
    let _ = with_timeout(rx.recv()).await;

    assert!(sup.stop("job"));
    let out = with_timeout(collect(&mut rx, "job")).await;
    assert!(out.exit.stop_requested);

    // The subshell would have created the marker by now had it survived.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
    Ok(())
}

#[tokio::test]
async fn stop_after_exit_reports_nothing_running() -> TestResult {
    init_tracing();
    let (sup, mut rx) = supervisor();

    sup.start("job", "true", Path::new("/"), TerminationPolicy::default())?;
    let out = with_timeout(collect(&mut rx, "job")).await;
    assert_eq!(out.exit.code, Some(0));

    // Nothing has released the slot yet, but the process is gone.
    assert!(sup.is_running("job"));
    assert!(!sup.stop("job"));
    Ok(())
}
