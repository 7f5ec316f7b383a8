// src/store/memory.rs

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::Result;
use crate::model::{Job, OutputLine, Variables};
use crate::store::{JobStore, StoreState, DEFAULT_HISTORY_LIMIT};

/// Keeps everything in memory only (lost on restart).
#[derive(Debug)]
pub struct MemoryJobStore {
    state: Mutex<StoreState>,
    history_limit: usize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            history_limit,
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for MemoryJobStore {
    fn load_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.state.lock().jobs.get(id).cloned())
    }

    fn save_job(&self, job: &Job) -> Result<()> {
        self.state.lock().jobs.insert(job.id.clone(), job.clone());
        debug!(job = %job.id, status = %job.status, "stored job (memory)");
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<bool> {
        Ok(self.state.lock().delete_job(id))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state.lock().jobs.values().cloned().collect())
    }

    fn append_output(&self, id: &str, line: OutputLine) -> Result<bool> {
        Ok(self.state.lock().append_output(id, line))
    }

    fn record_argument_history(&self, job_id: &str, argument: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .record_argument_history(job_id, argument, value, self.history_limit);
        Ok(())
    }

    fn list_argument_history(&self, job_id: &str, argument: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().argument_history(job_id, argument))
    }

    fn record_working_directory(&self, path: &str) -> Result<()> {
        self.state
            .lock()
            .record_working_directory(path, self.history_limit);
        Ok(())
    }

    fn list_recent_working_directories(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().working_directories.clone())
    }

    fn load_variables(&self) -> Result<Variables> {
        Ok(self.state.lock().variables.clone())
    }

    fn save_variables(&self, variables: &Variables) -> Result<()> {
        self.state.lock().variables = variables.clone();
        Ok(())
    }
}
