// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod invocation;
pub mod logging;
pub mod model;
pub mod store;
pub mod template;
pub mod types;

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{default_config_path, load_and_validate, ConfigFile};
use crate::engine::{EngineOptions, JobService};
use crate::errors::JobdagError;
use crate::events::JobEvent;
use crate::model::Job;
use crate::types::{ChainMode, JobStatus, OutputStream};

/// How long shutdown waits for processes before killing them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code used when a job or chain was stopped.
const EXIT_STOPPED: i32 = 130;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and syncing jobs into the store
/// - the engine (registry, supervisor, runtime)
/// - an event printer
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let json = args.json;

    match args.command.clone() {
        Command::TestRegex { regex, text } => test_regex(&regex, text.as_deref()),
        Command::List => list_jobs(&open_service(&args)?, json),
        Command::Show { job } => show_job(&open_service(&args)?, &job),
        Command::Run { job } => run_one(&open_service(&args)?, &job, json).await,
        Command::Chain { job, force } => {
            let mode = if force {
                ChainMode::ForceRerun
            } else {
                ChainMode::SkipSucceeded
            };
            run_chain(&open_service(&args)?, &job, mode, json).await
        }
        Command::Clear { job } => {
            let job = open_service(&args)?.clear_job(&job)?;
            println!("{} -> {}", job.id, job.status);
            Ok(0)
        }
        Command::History { job, argument } => {
            for value in open_service(&args)?.argument_history(&job, &argument)? {
                println!("{value}");
            }
            Ok(0)
        }
        Command::Dirs => {
            for dir in open_service(&args)?.recent_working_directories()? {
                println!("{dir}");
            }
            Ok(0)
        }
    }
}

/// Load the job file, open its store, start the engine and sync the file's
/// jobs into the store.
fn open_service(args: &CliArgs) -> Result<JobService> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let store = store::open_store(
        cfg.settings.store,
        &cfg.settings.state_file,
        cfg.settings.history_limit,
    )?;
    let service = JobService::start(store, EngineOptions::from(&cfg.settings));
    sync_config(&service, &cfg)?;
    Ok(service)
}

/// Bring the store in line with the job file.
///
/// Jobs are visited in dependency order: new ids are created, existing ones
/// get the file's definition (with cycle validation) and keep their run
/// state. Jobs no longer in the file are deleted afterwards, together with
/// their argument history.
pub fn sync_config(service: &JobService, cfg: &ConfigFile) -> errors::Result<()> {
    service.set_variables(&cfg.variables)?;

    for (id, definition) in cfg.definitions() {
        match service.job(&id) {
            Ok(existing) if existing.definition == definition => {}
            Ok(_) => {
                service.update_job(&id, definition)?;
            }
            Err(JobdagError::JobNotFound(_)) => {
                service.create_job(Some(id), definition)?;
            }
            Err(e) => return Err(e),
        }
    }

    for job in service.list_jobs()? {
        if !cfg.jobs.contains_key(&job.id) {
            info!(job = %job.id, "job removed from job file; deleting");
            service.delete_job(&job.id)?;
        }
    }
    debug!(jobs = cfg.jobs.len(), "synchronised job file into store");
    Ok(())
}

fn list_jobs(service: &JobService, json: bool) -> Result<i32> {
    let jobs = service.list_jobs()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(0);
    }

    for job in &jobs {
        let code = job
            .return_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<24} {:<8} {:>4}  {}", job.id, job.status, code, job.label());
        let deps = job.effective_dependencies();
        if !deps.is_empty() {
            println!("{:<24} after: {}", "", deps.join(", "));
        }
    }
    Ok(0)
}

fn show_job(service: &JobService, id: &str) -> Result<i32> {
    match service.preview(id) {
        Ok(inv) => {
            println!("{}", inv.command_line);
            if !inv.working_directory.is_empty() {
                println!("  cwd: {}", inv.working_directory);
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("{id}: {e}");
            Ok(1)
        }
    }
}

async fn run_one(service: &JobService, id: &str, json: bool) -> Result<i32> {
    let (done_tx, printer) = spawn_printer(service.subscribe(), json);
    let mut rx = service.subscribe();

    if let Err(e) = service.run_job(id) {
        finish_printer(done_tx, printer).await;
        eprintln!("{id}: {e}");
        return Ok(1);
    }

    let status = loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Ok(JobEvent::StatusChanged { id: ev_id, status, .. })
                    if ev_id == id && status.is_terminal() => break status,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    let status = service.job(id)?.status;
                    if status.is_terminal() {
                        break status;
                    }
                }
                Err(RecvError::Closed) => break service.job(id)?.status,
            },
            // A second Ctrl-C escalates straight to SIGKILL.
            _ = tokio::signal::ctrl_c() => {
                info!(job = %id, "interrupted; stopping job");
                service.stop_job(id);
            }
        }
    };

    finish_printer(done_tx, printer).await;
    let job = service.job(id)?;
    Ok(exit_code(status, &job))
}

async fn run_chain(service: &JobService, root: &str, mode: ChainMode, json: bool) -> Result<i32> {
    let (done_tx, printer) = spawn_printer(service.subscribe(), json);

    let chain = service.run_chain(root, mode);
    tokio::pin!(chain);

    let result = tokio::select! {
        res = &mut chain => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down chain");
            service.shutdown(SHUTDOWN_TIMEOUT).await;
            chain.await
        }
    };

    finish_printer(done_tx, printer).await;

    match result {
        Ok(report) => {
            info!(
                executed = ?report.executed,
                skipped = ?report.skipped,
                "chain complete"
            );
            Ok(0)
        }
        Err(JobdagError::ChainAborted { job, status }) => {
            eprintln!("chain aborted: {job} finished with status {status}");
            Ok(if status == JobStatus::Stopped {
                EXIT_STOPPED
            } else {
                1
            })
        }
        Err(e) => {
            eprintln!("chain failed: {e}");
            Ok(1)
        }
    }
}

fn exit_code(status: JobStatus, job: &Job) -> i32 {
    match status {
        JobStatus::Success => 0,
        JobStatus::Stopped => EXIT_STOPPED,
        _ => match job.return_code {
            Some(code) if code != 0 => code,
            _ => 1,
        },
    }
}

fn test_regex(pattern: &str, text: Option<&str>) -> Result<i32> {
    let text = match text {
        Some(t) => t.to_string(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading text from stdin")?;
            buf
        }
    };

    match invocation::test_extraction(pattern, &text)? {
        Some(value) => {
            println!("{value}");
            Ok(0)
        }
        None => {
            eprintln!("no match");
            Ok(1)
        }
    }
}

/// Print events until told to stop, then drain whatever is still queued.
fn spawn_printer(
    mut rx: broadcast::Receiver<JobEvent>,
    json: bool,
) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (done_tx, mut done_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => print_event(&ev, json),
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "printer lagged behind job events"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut done_rx => {
                    while let Ok(ev) = rx.try_recv() {
                        print_event(&ev, json);
                    }
                    break;
                }
            }
        }
    });

    (done_tx, handle)
}

async fn finish_printer(done_tx: oneshot::Sender<()>, printer: JoinHandle<()>) {
    let _ = done_tx.send(());
    let _ = printer.await;
}

fn print_event(event: &JobEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to serialise event"),
        }
        return;
    }

    match event {
        JobEvent::Output {
            job_id,
            stream: OutputStream::Stdout,
            content,
        } => println!("[{job_id}] {content}"),
        JobEvent::Output {
            job_id,
            stream: OutputStream::Stderr,
            content,
        } => eprintln!("[{job_id}] {content}"),
        JobEvent::StatusChanged {
            id,
            status,
            return_code,
        } => match return_code {
            Some(code) => eprintln!("[{id}] {status} (exit {code})"),
            None => eprintln!("[{id}] {status}"),
        },
        _ => {}
    }
}
