// src/store/mod.rs

//! Persistence for jobs, run state, histories and variables.
//!
//! - [`JobStore`] is the storage abstraction the engine talks to.
//! - [`memory`] keeps everything in process (tests, `store = "memory"`).
//! - [`file`] persists the whole state as one JSON document.
//!
//! Both implementations share [`StoreState`], so history ordering and
//! purge-on-delete behave identically regardless of backend.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::{Job, OutputLine, Variables};
use crate::types::{JobId, StoreMode};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// Default number of entries returned by the history listings.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Storage used by the engine.
///
/// Implementations use interior mutability so one store can be shared behind
/// an `Arc` by the service, the lifecycle and the CLI.
pub trait JobStore: Send + Sync {
    fn load_job(&self, id: &str) -> Result<Option<Job>>;

    fn save_job(&self, job: &Job) -> Result<()>;

    /// Remove a job and its argument history. Returns `false` if it did not
    /// exist.
    fn delete_job(&self, id: &str) -> Result<bool>;

    fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Append one line to a job's captured output as soon as it arrives.
    /// Returns `false` if the job no longer exists.
    fn append_output(&self, id: &str, line: OutputLine) -> Result<bool>;

    fn record_argument_history(&self, job_id: &str, argument: &str, value: &str) -> Result<()>;

    /// Distinct recent values, most recent first.
    fn list_argument_history(&self, job_id: &str, argument: &str) -> Result<Vec<String>>;

    fn record_working_directory(&self, path: &str) -> Result<()>;

    /// Distinct recent working directories, most recent first.
    fn list_recent_working_directories(&self) -> Result<Vec<String>>;

    fn load_variables(&self) -> Result<Variables>;

    fn save_variables(&self, variables: &Variables) -> Result<()>;
}

/// Build the store selected by `[config].store`.
pub fn open_store(
    mode: StoreMode,
    state_file: impl Into<std::path::PathBuf>,
    history_limit: usize,
) -> Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match mode {
        StoreMode::Memory => Arc::new(MemoryJobStore::with_history_limit(history_limit)),
        StoreMode::File => Arc::new(FileJobStore::open(state_file, history_limit)?),
    };
    Ok(store)
}

/// Everything a store holds, as one serialisable document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub jobs: BTreeMap<JobId, Job>,

    /// job id -> argument name -> values, most recent first.
    #[serde(default)]
    pub argument_history: BTreeMap<JobId, BTreeMap<String, Vec<String>>>,

    /// Most recent first.
    #[serde(default)]
    pub working_directories: Vec<String>,

    #[serde(default)]
    pub variables: Variables,
}

impl StoreState {
    pub fn delete_job(&mut self, id: &str) -> bool {
        self.argument_history.remove(id);
        self.jobs.remove(id).is_some()
    }

    pub fn append_output(&mut self, id: &str, line: OutputLine) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                job.output.push(line);
                true
            }
            None => false,
        }
    }

    pub fn record_argument_history(
        &mut self,
        job_id: &str,
        argument: &str,
        value: &str,
        limit: usize,
    ) {
        let values = self
            .argument_history
            .entry(job_id.to_string())
            .or_default()
            .entry(argument.to_string())
            .or_default();
        push_recent(values, value, limit);
    }

    pub fn argument_history(&self, job_id: &str, argument: &str) -> Vec<String> {
        self.argument_history
            .get(job_id)
            .and_then(|by_arg| by_arg.get(argument))
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_working_directory(&mut self, path: &str, limit: usize) {
        push_recent(&mut self.working_directories, path, limit);
    }
}

/// Move `value` to the front of `values`, keeping entries distinct and the
/// list at most `limit` long.
fn push_recent(values: &mut Vec<String>, value: &str, limit: usize) {
    values.retain(|v| v != value);
    values.insert(0, value.to_string());
    values.truncate(limit.max(1));
}
