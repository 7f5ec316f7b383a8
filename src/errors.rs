// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum JobdagError {
    /// Bad job definition or config (missing executable, bad working
    /// directory, unknown reference, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circular dependency: job '{job}' cannot depend on '{dependency}'")]
    CircularDependency { job: JobId, dependency: JobId },

    #[error("Dependency '{dependency}' of job '{job}' has not run successfully")]
    DependencyNotSatisfied { job: JobId, dependency: String },

    #[error("Regex for argument '{argument}' did not match the output of '{source_job}'")]
    Extraction { argument: String, source_job: String },

    #[error("Invalid regex for argument '{argument}': {message}")]
    InvalidRegex { argument: String, message: String },

    #[error("Failed to start process: {0}")]
    ProcessStart(String),

    #[error("Job is already running: {0}")]
    AlreadyRunning(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Chain aborted: job '{job}' finished with status {status}")]
    ChainAborted { job: JobId, status: JobStatus },

    #[error("Chain aborted: timed out waiting for job '{job}'")]
    ChainTimeout { job: JobId },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobdagError {
    /// Errors raised before any process is spawned.
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            JobdagError::Validation(_)
                | JobdagError::CircularDependency { .. }
                | JobdagError::DependencyNotSatisfied { .. }
                | JobdagError::Extraction { .. }
                | JobdagError::InvalidRegex { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;
