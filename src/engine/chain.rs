// src/engine/chain.rs

//! Chain runner: execute a job's transitive dependencies in order.
//!
//! The runner talks to a [`JobLauncher`] so it can be driven by the real
//! [`crate::engine::JobService`] or by a scripted fake in tests.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::dag::{chain_order, DepGraph};
use crate::errors::{JobdagError, Result};
use crate::events::JobEvent;
use crate::types::{ChainMode, JobId, JobStatus};

/// What the chain runner needs from the engine.
pub trait JobLauncher: Send + Sync {
    /// Start one run of `job_id`. Pre-spawn failures are returned here.
    fn launch(&self, job_id: &str) -> Result<()>;

    /// Current stored status of `job_id`.
    fn status_of(&self, job_id: &str) -> Result<JobStatus>;

    /// Snapshot of the dependency graph.
    fn dependency_graph(&self) -> Result<DepGraph>;

    /// Subscribe to job events.
    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;
}

/// Outcome of a chain that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Full execution order computed for the root.
    pub order: Vec<JobId>,
    /// Jobs that were started, in order.
    pub executed: Vec<JobId>,
    /// Jobs skipped because they had already succeeded.
    pub skipped: Vec<JobId>,
}

#[derive(Debug, Clone)]
pub struct ChainRunner<L> {
    launcher: L,
    step_timeout: Option<Duration>,
}

impl<L: JobLauncher> ChainRunner<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            step_timeout: None,
        }
    }

    /// Give up on a job that has not reached a terminal status in time.
    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Run the chain rooted at `root`.
    ///
    /// Jobs run one at a time in dependency order. The first job that ends
    /// in anything but `success` aborts the chain; later jobs are never
    /// started and keep their previous state.
    pub async fn run(&self, root: &str, mode: ChainMode) -> Result<ChainReport> {
        let graph = self.launcher.dependency_graph()?;
        let order = chain_order(&graph, root)?;
        info!(root = %root, ?order, ?mode, "starting chain");

        let mut report = ChainReport {
            order: order.clone(),
            ..ChainReport::default()
        };

        for job_id in order {
            if mode == ChainMode::SkipSucceeded
                && self.launcher.status_of(&job_id)? == JobStatus::Success
            {
                debug!(job = %job_id, "already succeeded; skipping");
                report.skipped.push(job_id);
                continue;
            }

            // Subscribe before launching so the terminal event cannot be
            // missed.
            let mut rx = self.launcher.subscribe();
            self.launcher.launch(&job_id)?;
            report.executed.push(job_id.clone());

            let status = self.await_terminal(&mut rx, &job_id).await?;
            if status != JobStatus::Success {
                warn!(job = %job_id, status = %status, "chain aborted");
                return Err(JobdagError::ChainAborted {
                    job: job_id,
                    status,
                });
            }
            debug!(job = %job_id, "chain step succeeded");
        }

        info!(root = %root, executed = report.executed.len(), "chain finished");
        Ok(report)
    }

    async fn await_terminal(
        &self,
        rx: &mut broadcast::Receiver<JobEvent>,
        job_id: &str,
    ) -> Result<JobStatus> {
        let wait = wait_for_terminal(rx, job_id, &self.launcher);
        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| JobdagError::ChainTimeout {
                    job: job_id.to_string(),
                })?,
            None => wait.await,
        }
    }
}

/// Resolve once the first terminal status for `job_id` arrives. The
/// receiver is dropped by the caller afterwards, which unsubscribes it.
async fn wait_for_terminal<L: JobLauncher>(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: &str,
    launcher: &L,
) -> Result<JobStatus> {
    loop {
        match rx.recv().await {
            Ok(JobEvent::StatusChanged { id, status, .. })
                if id == job_id && status.is_terminal() =>
            {
                return Ok(status);
            }
            Ok(JobEvent::Deleted { id }) if id == job_id => {
                return Err(JobdagError::JobNotFound(id));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // The launch stored `running`, so a terminal stored status
                // can only come from this run.
                warn!(job = %job_id, skipped, "chain subscriber lagged; checking stored status");
                let status = launcher.status_of(job_id)?;
                if status.is_terminal() {
                    return Ok(status);
                }
            }
            Err(RecvError::Closed) => {
                return Err(JobdagError::Other(anyhow::anyhow!(
                    "event bus closed while waiting for job '{job_id}'"
                )));
            }
        }
    }
}
