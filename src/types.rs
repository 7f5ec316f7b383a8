// src/types.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical job identifier type used throughout the crate.
pub type JobId = String;

/// Generate a fresh, unique job id.
pub fn new_job_id() -> JobId {
    format!("job-{}", uuid::Uuid::new_v4())
}

/// Lifecycle status of a job.
///
/// - `Idle`: never run, or explicitly cleared.
/// - `Running`: a process for this job is tracked by the registry.
/// - `Success` / `Error` / `Stopped`: terminal outcomes of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
    Stopped,
}

impl JobStatus {
    /// `success`, `error` and `stopped` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipe of the child process a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Mode for storing job definitions, run state and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Persist everything in a JSON state file (`.jobdag/state.json`).
    #[default]
    File,
    /// Keep everything in memory only (lost on restart).
    Memory,
}

/// How a chain run treats dependencies that already succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainMode {
    /// Jobs whose status is already `success` are treated as satisfied.
    #[default]
    SkipSucceeded,
    /// Every job in the chain is run again.
    ForceRerun,
}
