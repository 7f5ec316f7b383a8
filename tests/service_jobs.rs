mod common;
use crate::common::builders::JobBuilder;
use crate::common::{fast_options, init_tracing, memory_service, next_terminal, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobdag::engine::JobService;
use jobdag::errors::JobdagError;
use jobdag::model::{Argument, OutputLine};
use jobdag::store::{FileJobStore, JobStore};
use jobdag::types::{ChainMode, JobStatus};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn cycle_on_update_is_rejected_and_nothing_is_stored() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    service.create_job(Some("a".into()), JobBuilder::new("a").definition())?;
    service.create_job(Some("b".into()), JobBuilder::new("b").after("a").definition())?;

    // a -> b would close a -> b -> a.
    let err = service
        .update_job("a", JobBuilder::new("a").after("b").definition())
        .unwrap_err();
    assert!(matches!(err, JobdagError::CircularDependency { .. }));
    assert!(service.job("a")?.definition.dependencies.is_empty());

    // The same cycle through an output-extraction argument.
    let err = service
        .update_job(
            "a",
            JobBuilder::new("a")
                .arg(Argument::from_output("--id", "b", r"(\d+)"))
                .definition(),
        )
        .unwrap_err();
    assert!(matches!(err, JobdagError::CircularDependency { .. }));
    assert!(service.job("a")?.definition.arguments.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_dependency_is_a_validation_error() {
    let (service, _store) = memory_service();
    let err = service
        .create_job(Some("x".into()), JobBuilder::new("x").after("ghost").definition())
        .unwrap_err();
    assert!(matches!(err, JobdagError::Validation(_)));
}

#[tokio::test]
async fn run_captures_output_and_exit_code() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();
    let mut rx = service.subscribe();

    service.create_job(
        Some("greet".into()),
        JobBuilder::new("greet")
            .executable("echo hello; echo warn >&2; exit 4")
            .working_directory("/")
            .definition(),
    )?;

    let started = service.run_job("greet")?;
    assert_eq!(started.command_line, "echo hello; echo warn >&2; exit 4");

    let status = with_timeout(next_terminal(&mut rx, "greet")).await;
    assert_eq!(status, JobStatus::Error);

    let job = service.job("greet")?;
    assert_eq!(job.return_code, Some(4));
    assert!(job.output.contains(&OutputLine::stdout("hello")));
    assert!(job.output.contains(&OutputLine::stderr("warn")));
    assert_eq!(job.generated_command, "echo hello; echo warn >&2; exit 4");
    assert!(!service.is_running("greet"));
    Ok(())
}

#[tokio::test]
async fn second_run_while_running_is_rejected() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();
    let mut rx = service.subscribe();

    service.create_job(
        Some("slow".into()),
        JobBuilder::new("slow")
            .executable("sleep 5")
            .working_directory("/")
            .definition(),
    )?;

    service.run_job("slow")?;
    assert!(matches!(
        service.run_job("slow"),
        Err(JobdagError::AlreadyRunning(_))
    ));
    assert!(matches!(
        service.clear_job("slow"),
        Err(JobdagError::AlreadyRunning(_))
    ));

    assert!(service.stop_job("slow"));
    assert_eq!(
        with_timeout(next_terminal(&mut rx, "slow")).await,
        JobStatus::Stopped
    );
    Ok(())
}

#[tokio::test]
async fn pre_spawn_failure_sets_error_and_message() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    service.create_job(
        Some("lost".into()),
        JobBuilder::new("lost")
            .executable("echo hi")
            .working_directory("/definitely/not/here")
            .definition(),
    )?;

    let err = service.run_job("lost").unwrap_err();
    assert!(err.is_pre_spawn());

    let job = service.job("lost")?;
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.output.len(), 1);
    assert!(job.output[0].content.contains("/definitely/not/here"));
    assert!(!service.is_running("lost"));
    assert!(service.recent_working_directories()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn chain_passes_extracted_value_downstream() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    service.create_job(
        Some("login".into()),
        JobBuilder::new("login")
            .executable("echo connecting; echo token: abc123")
            .working_directory("/")
            .definition(),
    )?;
    service.create_job(
        Some("fetch".into()),
        JobBuilder::new("fetch")
            .executable("echo")
            .working_directory("/")
            .arg(Argument::from_output("-n", "login", r"token: (\w+)"))
            .definition(),
    )?;

    let report = with_timeout(service.run_chain("fetch", ChainMode::SkipSucceeded)).await?;
    assert_eq!(report.order, vec!["login", "fetch"]);

    let fetch = service.job("fetch")?;
    assert_eq!(fetch.status, JobStatus::Success);
    assert_eq!(fetch.generated_command, "echo -n abc123");
    assert_eq!(fetch.captured_stdout(), "abc123");

    // Second chain skips the already successful dependency.
    let report = with_timeout(service.run_chain("fetch", ChainMode::SkipSucceeded)).await?;
    assert_eq!(report.skipped, vec!["login", "fetch"]);
    Ok(())
}

#[tokio::test]
async fn chain_stops_at_failing_job() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    service.create_job(
        Some("build".into()),
        JobBuilder::new("build")
            .executable("exit 2")
            .working_directory("/")
            .definition(),
    )?;
    service.create_job(
        Some("deploy".into()),
        JobBuilder::new("deploy")
            .executable("echo deployed")
            .working_directory("/")
            .after("build")
            .definition(),
    )?;

    let err = with_timeout(service.run_chain("deploy", ChainMode::SkipSucceeded))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JobdagError::ChainAborted { ref job, status: JobStatus::Error } if job == "build"
    ));
    assert_eq!(service.job("deploy")?.status, JobStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn history_is_recorded_and_purged_on_delete() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();
    let mut rx = service.subscribe();

    service.create_job(
        Some("ping".into()),
        JobBuilder::new("ping")
            .executable("echo")
            .working_directory("/")
            .arg(Argument::named("-c", "3"))
            .definition(),
    )?;
    service.run_job("ping")?;
    with_timeout(next_terminal(&mut rx, "ping")).await;

    assert_eq!(service.argument_history("ping", "-c")?, vec!["3"]);
    assert_eq!(service.recent_working_directories()?, vec!["/"]);

    assert!(service.delete_job("ping")?);
    assert!(service.argument_history("ping", "-c")?.is_empty());
    assert!(matches!(service.job("ping"), Err(JobdagError::JobNotFound(_))));
    assert!(!service.delete_job("ping")?);
    Ok(())
}

#[tokio::test]
async fn stop_on_idle_job_is_a_no_op() -> TestResult {
    let (service, _store) = memory_service();
    service.create_job(Some("idle".into()), JobBuilder::new("idle").definition())?;

    assert!(!service.stop_job("idle"));
    assert_eq!(service.job("idle")?.status, JobStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn clear_resets_a_finished_job() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();
    let mut rx = service.subscribe();

    service.create_job(
        Some("once".into()),
        JobBuilder::new("once")
            .executable("echo done")
            .working_directory("/")
            .definition(),
    )?;
    service.run_job("once")?;
    assert_eq!(
        with_timeout(next_terminal(&mut rx, "once")).await,
        JobStatus::Success
    );

    let job = service.clear_job("once")?;
    assert_eq!(job.status, JobStatus::Idle);
    assert!(job.output.is_empty());
    assert_eq!(job.return_code, None);
    Ok(())
}

#[tokio::test]
async fn large_output_is_captured_in_full_by_the_file_store() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.json");
    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open(&path, 10)?);
    let service = JobService::start(Arc::clone(&store), fast_options());
    let mut rx = service.subscribe();

    service.create_job(
        Some("count".into()),
        JobBuilder::new("count")
            .executable("seq 1 3000; echo token: FINAL")
            .working_directory("/")
            .definition(),
    )?;
    service.run_job("count")?;
    assert_eq!(
        with_timeout(next_terminal(&mut rx, "count")).await,
        JobStatus::Success
    );

    let job = service.job("count")?;
    assert_eq!(job.output.len(), 3001);
    assert_eq!(job.output[0], OutputLine::stdout("1"));
    assert_eq!(job.output.last(), Some(&OutputLine::stdout("token: FINAL")));

    // The terminal save wrote every line, not just the ones before a flush.
    drop(service);
    drop(store);
    let reopened = FileJobStore::open(&path, 10)?;
    let job = reopened.load_job("count")?.ok_or("job missing after reopen")?;
    assert_eq!(job.output.len(), 3001);
    assert_eq!(job.status, JobStatus::Success);
    Ok(())
}

#[tokio::test]
async fn deleting_a_running_job_stops_it_and_purges_history() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    service.create_job(
        Some("long".into()),
        JobBuilder::new("long")
            .executable("sleep")
            .working_directory("/")
            .arg(Argument::positional("30"))
            .definition(),
    )?;
    service.run_job("long")?;
    assert!(service.is_running("long"));
    assert_eq!(service.argument_history("long", "")?, vec!["30"]);

    assert!(service.delete_job("long")?);
    assert!(!service.is_running("long"));
    assert!(matches!(service.job("long"), Err(JobdagError::JobNotFound(_))));
    assert!(service.argument_history("long", "")?.is_empty());

    // The slot is free, so a job recreated under the same id can run.
    service.create_job(
        Some("long".into()),
        JobBuilder::new("long")
            .executable("echo again")
            .working_directory("/")
            .definition(),
    )?;
    let mut rx = service.subscribe();
    service.run_job("long")?;
    assert_eq!(
        with_timeout(next_terminal(&mut rx, "long")).await,
        JobStatus::Success
    );
    Ok(())
}

#[tokio::test]
async fn shutdown_returns_as_soon_as_processes_exit() -> TestResult {
    init_tracing();
    let (service, _store) = memory_service();

    for id in ["one", "two"] {
        service.create_job(
            Some(id.into()),
            JobBuilder::new(id)
                .executable("sleep 30")
                .working_directory("/")
                .definition(),
        )?;
        service.run_job(id)?;
    }

    let started = Instant::now();
    let stopped = with_timeout(service.shutdown(Duration::from_secs(5))).await;
    assert_eq!(stopped, 2);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!service.is_running("one"));
    assert!(!service.is_running("two"));
    assert_eq!(service.job("one")?.status, JobStatus::Stopped);
    Ok(())
}
