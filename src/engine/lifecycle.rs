// src/engine/lifecycle.rs

//! Job status state machine.
//!
//! Every transition persists the job first and then publishes a
//! `job.status_changed` delta. Output lines are appended to the stored job
//! as they arrive and published as `job.output`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::errors::{JobdagError, Result};
use crate::events::{EventBus, JobEvent};
use crate::exec::{ProcessExit, ProcessRegistry};
use crate::model::{Job, OutputLine};
use crate::store::JobStore;
use crate::types::{JobStatus, OutputStream};

/// Terminal status for a finished process.
///
/// A requested stop or a terminating signal wins over the exit code, so a
/// program that exits 0 on SIGTERM still reports `stopped`.
pub fn terminal_status(exit: &ProcessExit) -> JobStatus {
    if exit.stop_requested || exit.signal.is_some() {
        JobStatus::Stopped
    } else if exit.code == Some(0) {
        JobStatus::Success
    } else {
        JobStatus::Error
    }
}

/// Whether `from -> to` is a legal transition.
///
/// `running` is only ever entered from a non-running state and only left
/// towards a terminal state. `error` is also reachable directly when a run
/// fails before spawning, and `idle` only through an explicit clear.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        (Running, Success | Error | Stopped) => true,
        (Running, _) => false,
        (_, Running | Idle | Error) => true,
        (_, Success | Stopped) => false,
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn JobStore>,
    bus: EventBus,
    registry: Arc<ProcessRegistry>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub fn new(store: Arc<dyn JobStore>, bus: EventBus, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            store,
            bus,
            registry,
        }
    }

    fn load(&self, job_id: &str) -> Result<Job> {
        self.store
            .load_job(job_id)?
            .ok_or_else(|| JobdagError::JobNotFound(job_id.to_string()))
    }

    fn transition(&self, job: &mut Job, to: JobStatus) {
        if !can_transition(job.status, to) {
            warn!(job = %job.id, from = %job.status, to = %to, "unexpected status transition");
        }
        debug!(job = %job.id, from = %job.status, to = %to, "status transition");
        job.status = to;
    }

    fn publish_status(&self, job: &Job) {
        self.bus.publish(JobEvent::StatusChanged {
            id: job.id.clone(),
            status: job.status,
            return_code: job.return_code,
        });
    }

    /// `* -> running`: clear the previous run and remember the command line.
    pub fn begin_run(&self, job_id: &str, command_line: &str) -> Result<Job> {
        let mut job = self.load(job_id)?;
        self.transition(&mut job, JobStatus::Running);
        job.reset_run_state();
        job.generated_command = command_line.to_string();
        self.store.save_job(&job)?;
        self.publish_status(&job);
        Ok(job)
    }

    /// A run that never got a process: status `error`, the message becomes
    /// the job's only output line.
    pub fn fail_before_spawn(&self, job_id: &str, err: &JobdagError) -> Result<()> {
        let Some(mut job) = self.store.load_job(job_id)? else {
            return Ok(());
        };
        info!(job = %job_id, error = %err, "run failed before spawn");

        self.transition(&mut job, JobStatus::Error);
        job.return_code = None;
        let message = err.to_string();
        job.output = vec![OutputLine::stderr(message.clone())];
        self.store.save_job(&job)?;

        self.bus.publish(JobEvent::Output {
            job_id: job.id.clone(),
            stream: OutputStream::Stderr,
            content: message,
        });
        self.publish_status(&job);
        Ok(())
    }

    /// Append one output line of run `run_id`. Lines from a run that is no
    /// longer current are dropped.
    pub fn record_output(
        &self,
        job_id: &str,
        run_id: u64,
        stream: OutputStream,
        content: String,
    ) -> Result<()> {
        if self.registry.current_run(job_id) != Some(run_id) {
            trace!(job = %job_id, run_id, "dropping output of a stale run");
            return Ok(());
        }

        let line = OutputLine {
            stream,
            content: content.clone(),
        };
        if self.store.append_output(job_id, line)? {
            self.bus.publish(JobEvent::Output {
                job_id: job_id.to_string(),
                stream,
                content,
            });
        }
        Ok(())
    }

    /// `running -> success | error | stopped`.
    ///
    /// The new state is stored before the registry slot is released, and the
    /// notification goes out last, so an observer reacting to it sees the
    /// final state and may start the job again. The slot is released even if
    /// storing fails.
    pub fn finish(&self, job_id: &str, run_id: u64, exit: ProcessExit) -> Result<JobStatus> {
        let status = terminal_status(&exit);

        if self.registry.current_run(job_id) != Some(run_id) {
            debug!(job = %job_id, run_id, "ignoring exit of a stale run");
            return Ok(status);
        }

        let persisted = self.persist_exit(job_id, status, exit.code);
        self.registry.release(job_id, run_id);

        info!(job = %job_id, status = %status, exit_code = ?exit.code, "job finished");
        self.bus.publish(JobEvent::StatusChanged {
            id: job_id.to_string(),
            status,
            return_code: exit.code,
        });
        persisted.map(|()| status)
    }

    fn persist_exit(&self, job_id: &str, status: JobStatus, code: Option<i32>) -> Result<()> {
        // The job may have been deleted while it ran.
        let Some(mut job) = self.store.load_job(job_id)? else {
            return Ok(());
        };
        self.transition(&mut job, status);
        job.return_code = code;
        self.store.save_job(&job)
    }

    /// Explicit reset to `idle`, dropping output and return code.
    pub fn clear(&self, job_id: &str) -> Result<Job> {
        if self.registry.is_running(job_id) {
            return Err(JobdagError::AlreadyRunning(job_id.to_string()));
        }
        let mut job = self.load(job_id)?;
        self.transition(&mut job, JobStatus::Idle);
        job.reset_run_state();
        self.store.save_job(&job)?;
        self.publish_status(&job);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ProcessHandle;
    use crate::model::JobDefinition;
    use crate::store::MemoryJobStore;

    fn exit(code: Option<i32>, signal: Option<i32>, stop_requested: bool) -> ProcessExit {
        ProcessExit {
            code,
            signal,
            stop_requested,
        }
    }

    #[test]
    fn terminal_status_rules() {
        assert_eq!(terminal_status(&exit(Some(0), None, false)), JobStatus::Success);
        assert_eq!(terminal_status(&exit(Some(3), None, false)), JobStatus::Error);
        assert_eq!(terminal_status(&exit(None, Some(9), false)), JobStatus::Stopped);
        assert_eq!(terminal_status(&exit(Some(0), None, true)), JobStatus::Stopped);
    }

    #[test]
    fn running_only_leaves_towards_terminal_states() {
        assert!(can_transition(JobStatus::Running, JobStatus::Success));
        assert!(!can_transition(JobStatus::Running, JobStatus::Idle));
        assert!(!can_transition(JobStatus::Running, JobStatus::Running));
        assert!(can_transition(JobStatus::Error, JobStatus::Running));
        assert!(!can_transition(JobStatus::Idle, JobStatus::Success));
    }

    fn lifecycle() -> (Lifecycle, Arc<dyn JobStore>, Arc<ProcessRegistry>) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let registry = ProcessRegistry::new();
        let lc = Lifecycle::new(Arc::clone(&store), EventBus::default(), Arc::clone(&registry));
        store
            .save_job(&Job::new("a", JobDefinition::new("a", "echo hi")))
            .unwrap();
        (lc, store, registry)
    }

    #[test]
    fn finish_releases_the_slot_and_records_the_code() {
        let (lc, store, registry) = lifecycle();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let res = registry.reserve("a").unwrap();
        let run_id = res.run_id();
        registry.attach(res, ProcessHandle::new(run_id, None, "echo hi", tx));

        lc.begin_run("a", "echo hi").unwrap();
        lc.record_output("a", run_id, OutputStream::Stdout, "hi".into())
            .unwrap();
        let status = lc.finish("a", run_id, exit(Some(0), None, false)).unwrap();

        assert_eq!(status, JobStatus::Success);
        assert!(!registry.is_running("a"));
        let job = store.load_job("a").unwrap().unwrap();
        assert_eq!(job.return_code, Some(0));
        assert_eq!(job.captured_stdout(), "hi");
        assert_eq!(job.generated_command, "echo hi");
    }

    #[test]
    fn clear_is_rejected_while_running() {
        let (lc, _store, registry) = lifecycle();
        let _res = registry.reserve("a").unwrap();
        assert!(matches!(lc.clear("a"), Err(JobdagError::AlreadyRunning(_))));
    }

    #[test]
    fn pre_spawn_failure_becomes_the_output() {
        let (lc, store, _registry) = lifecycle();
        let err = JobdagError::Validation("working directory does not exist: /nope".into());
        lc.fail_before_spawn("a", &err).unwrap();

        let job = store.load_job("a").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.output.len(), 1);
        assert_eq!(job.output[0].stream, OutputStream::Stderr);
        assert!(job.output[0].content.contains("/nope"));
    }
}
