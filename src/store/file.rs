// src/store/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::model::{Job, OutputLine, Variables};
use crate::store::{JobStore, StoreState};

/// Default location of the state file, relative to the working directory.
pub const STATE_FILE_PATH: &str = ".jobdag/state.json";

/// Output appended within this window of the last write is kept in memory
/// only; the next write (or the job's final save) picks it up.
pub const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Persists the whole [`StoreState`] as a JSON document.
///
/// The state is cached in memory. Definition, status, history and variable
/// changes rewrite the file immediately (temp file + rename, so a crash never
/// leaves a torn file). Output lines are batched: at most one write per
/// [`OUTPUT_FLUSH_INTERVAL`] while a job streams, so a chatty process does
/// not cost one full-document write per line.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    inner: Mutex<Cached>,
    history_limit: usize,
}

#[derive(Debug)]
struct Cached {
    state: StoreState,
    last_write: Instant,
    dirty: bool,
}

impl FileJobStore {
    /// Open (or lazily create) the state file at `path`.
    pub fn open(path: impl Into<PathBuf>, history_limit: usize) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        info!(
            path = %path.display(),
            jobs = state.jobs.len(),
            "opened job state file"
        );
        Ok(Self {
            path,
            inner: Mutex::new(Cached {
                state,
                last_write: Instant::now(),
                dirty: false,
            }),
            history_limit,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write pending output to disk, if any.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dirty {
            self.write(&mut inner)?;
        }
        Ok(())
    }

    /// Apply `f` to the cached state and write the result to disk.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T> {
        let mut inner = self.inner.lock();
        let out = f(&mut inner.state);
        self.write(&mut inner)?;
        Ok(out)
    }

    fn write(&self, inner: &mut Cached) -> Result<()> {
        save_state(&self.path, &inner.state)?;
        inner.last_write = Instant::now();
        inner.dirty = false;
        Ok(())
    }
}

impl Drop for FileJobStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush job state");
        }
    }
}

fn load_state(path: &Path) -> Result<StoreState> {
    if !path.exists() {
        return Ok(StoreState::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading state file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(StoreState::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn save_state(path: &Path, state: &StoreState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating temp state file {}", tmp.display()))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing state file {}", path.display()))?;

    debug!(path = %path.display(), bytes = bytes.len(), "wrote state file");
    Ok(())
}

impl JobStore for FileJobStore {
    fn load_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().state.jobs.get(id).cloned())
    }

    fn save_job(&self, job: &Job) -> Result<()> {
        self.mutate(|s| {
            s.jobs.insert(job.id.clone(), job.clone());
        })
    }

    fn delete_job(&self, id: &str) -> Result<bool> {
        self.mutate(|s| s.delete_job(id))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.inner.lock().state.jobs.values().cloned().collect())
    }

    fn append_output(&self, id: &str, line: OutputLine) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.state.append_output(id, line) {
            return Ok(false);
        }
        inner.dirty = true;
        if inner.last_write.elapsed() >= OUTPUT_FLUSH_INTERVAL {
            self.write(&mut inner)?;
        }
        Ok(true)
    }

    fn record_argument_history(&self, job_id: &str, argument: &str, value: &str) -> Result<()> {
        let limit = self.history_limit;
        self.mutate(|s| s.record_argument_history(job_id, argument, value, limit))
    }

    fn list_argument_history(&self, job_id: &str, argument: &str) -> Result<Vec<String>> {
        Ok(self.inner.lock().state.argument_history(job_id, argument))
    }

    fn record_working_directory(&self, path: &str) -> Result<()> {
        let limit = self.history_limit;
        self.mutate(|s| s.record_working_directory(path, limit))
    }

    fn list_recent_working_directories(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().state.working_directories.clone())
    }

    fn load_variables(&self) -> Result<Variables> {
        Ok(self.inner.lock().state.variables.clone())
    }

    fn save_variables(&self, variables: &Variables) -> Result<()> {
        self.mutate(|s| s.variables = variables.clone())
    }
}
