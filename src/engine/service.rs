// src/engine/service.rs

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::dag::{added_dependencies, check_new_dependencies, DepGraph};
use crate::errors::{JobdagError, Result};
use crate::events::{EventBus, JobEvent};
use crate::exec::supervisor::DEFAULT_DRAIN_TIMEOUT;
use crate::exec::{ProcessEvent, ProcessRegistry, Supervisor, TerminationPolicy};
use crate::invocation::{self, Invocation, JobTable};
use crate::model::{Job, JobDefinition, Variables};
use crate::store::JobStore;
use crate::types::{new_job_id, ChainMode, JobId, JobStatus};

use super::chain::{ChainReport, ChainRunner, JobLauncher};
use super::lifecycle::Lifecycle;
use super::runtime::Runtime;

/// Capacity of the supervisor -> runtime channel.
const PROCESS_EVENT_CAPACITY: usize = 256;

/// Process and chain behaviour of the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub grace_period: Duration,
    pub interrupt_grace_period: Duration,
    /// Executable names stopped with SIGINT and the longer grace period.
    pub interrupt_commands: Vec<String>,
    pub chain_step_timeout: Option<Duration>,
    pub drain_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            grace_period: settings.grace_period,
            interrupt_grace_period: settings.interrupt_grace_period,
            interrupt_commands: settings.interrupt_commands.clone(),
            chain_step_timeout: settings.chain_step_timeout,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl EngineOptions {
    /// Termination policy for a command line, chosen by the basename of its
    /// first word.
    pub fn termination_policy(&self, command_line: &str) -> TerminationPolicy {
        let program = command_line
            .split_whitespace()
            .next()
            .map(|word| {
                Path::new(word)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(word)
            })
            .unwrap_or_default();

        if self.interrupt_commands.iter().any(|c| c == program) {
            TerminationPolicy::interrupt(self.interrupt_grace_period)
        } else {
            TerminationPolicy::terminate(self.grace_period)
        }
    }
}

/// A run that was accepted and spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStarted {
    pub job_id: JobId,
    pub run_id: u64,
    pub command_line: String,
    pub working_directory: PathBuf,
}

/// Boundary commands: create, update, delete, run, stop, clear and chain.
///
/// Cloning is cheap; all clones share the same store, registry and bus.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    bus: EventBus,
    registry: Arc<ProcessRegistry>,
    supervisor: Supervisor,
    lifecycle: Lifecycle,
    options: Arc<EngineOptions>,
}

impl fmt::Debug for JobService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobService")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl JobService {
    /// Wire up registry, supervisor and runtime around `store` and spawn the
    /// runtime loop. Must be called from within a Tokio runtime.
    pub fn start(store: Arc<dyn JobStore>, options: EngineOptions) -> Self {
        let bus = EventBus::default();
        let registry = ProcessRegistry::new();
        let (tx, rx) = mpsc::channel::<ProcessEvent>(PROCESS_EVENT_CAPACITY);

        let supervisor = Supervisor::new(Arc::clone(&registry), tx)
            .with_drain_timeout(options.drain_timeout);
        let lifecycle = Lifecycle::new(Arc::clone(&store), bus.clone(), Arc::clone(&registry));

        tokio::spawn(Runtime::new(lifecycle.clone(), rx).run());

        Self {
            store,
            bus,
            registry,
            supervisor,
            lifecycle,
            options: Arc::new(options),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list_jobs()
    }

    pub fn job(&self, id: &str) -> Result<Job> {
        self.store
            .load_job(id)?
            .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))
    }

    fn job_table(&self) -> Result<JobTable> {
        Ok(self
            .store
            .list_jobs()?
            .into_iter()
            .map(|j| (j.id.clone(), j))
            .collect::<HashMap<_, _>>())
    }

    pub fn dependency_graph(&self) -> Result<DepGraph> {
        let jobs = self.store.list_jobs()?;
        Ok(DepGraph::from_jobs(&jobs))
    }

    fn validate_definition(&self, id: &str, def: &JobDefinition, known: &JobTable) -> Result<()> {
        if def.executable.trim().is_empty() {
            return Err(JobdagError::Validation(format!(
                "job '{id}' needs an executable"
            )));
        }
        for dep in &def.dependencies {
            if dep != id && !known.contains_key(dep) {
                return Err(JobdagError::Validation(format!(
                    "job '{id}' depends on unknown job '{dep}'"
                )));
            }
        }
        Ok(())
    }

    /// Create a job. A fresh id is generated when `id` is `None`.
    pub fn create_job(&self, id: Option<JobId>, definition: JobDefinition) -> Result<Job> {
        let id = id.unwrap_or_else(new_job_id);
        let jobs = self.job_table()?;
        if jobs.contains_key(&id) {
            return Err(JobdagError::Validation(format!("job '{id}' already exists")));
        }
        self.validate_definition(&id, &definition, &jobs)?;

        let graph = DepGraph::from_jobs(jobs.values());
        check_new_dependencies(&graph, &id, &definition.effective_dependencies())?;

        let job = Job::new(id, definition);
        self.store.save_job(&job)?;
        info!(job = %job.id, name = %job.name(), "created job");
        self.bus.publish(JobEvent::Created {
            job: Box::new(job.clone()),
        });
        Ok(job)
    }

    /// Replace a job's definition, keeping its run state.
    ///
    /// Dependencies that are new in `definition` (explicit or implicit) are
    /// checked for cycles first; on rejection nothing is stored.
    pub fn update_job(&self, id: &str, definition: JobDefinition) -> Result<Job> {
        let jobs = self.job_table()?;
        let mut job = jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))?;
        self.validate_definition(id, &definition, &jobs)?;

        let next = definition.effective_dependencies();
        let added = added_dependencies(&job.effective_dependencies(), &next);
        if !added.is_empty() {
            let graph = DepGraph::from_jobs(jobs.values()).with_dependencies(id, next);
            check_new_dependencies(&graph, id, &added)?;
        }

        job.apply_definition(definition);
        self.store.save_job(&job)?;
        debug!(job = %id, ?added, "updated job");
        self.bus.publish(JobEvent::Updated {
            job: Box::new(job.clone()),
        });
        Ok(job)
    }

    /// Delete a job: stop its process, drop its registry entry, and purge
    /// it and its argument history from the store.
    pub fn delete_job(&self, id: &str) -> Result<bool> {
        if self.supervisor.stop(id) {
            info!(job = %id, "stopping process of deleted job");
        }
        if let Some(run_id) = self.registry.current_run(id) {
            self.registry.release(id, run_id);
        }

        let existed = self.store.delete_job(id)?;
        if existed {
            info!(job = %id, "deleted job");
            self.bus.publish(JobEvent::Deleted { id: id.to_string() });
        }
        Ok(existed)
    }

    /// Build the invocation `id` would run now, without side effects.
    pub fn preview(&self, id: &str) -> Result<Invocation> {
        let job = self.job(id)?;
        let jobs = self.job_table()?;
        let variables = self.store.load_variables()?;
        invocation::build(&job, &jobs, &variables)
    }

    /// Start one run of `id`.
    ///
    /// Rejected with `AlreadyRunning` if a run is tracked. Any other failure
    /// before the process exists puts the job into `error` with the message
    /// as its output and is returned here as well.
    pub fn run_job(&self, id: &str) -> Result<RunStarted> {
        let reservation = self.registry.reserve(id)?;
        let job = self.job(id)?;

        let prepared = self.prepare(&job);
        let (inv, working_directory) = match prepared {
            Ok(p) => p,
            Err(e) => {
                self.lifecycle.fail_before_spawn(id, &e)?;
                return Err(e);
            }
        };

        for entry in &inv.history {
            self.store
                .record_argument_history(&entry.job_id, &entry.argument_name, &entry.value)?;
        }
        self.store
            .record_working_directory(&working_directory.to_string_lossy())?;

        self.lifecycle.begin_run(id, &inv.command_line)?;

        let policy = self.options.termination_policy(&inv.command_line);
        match self
            .supervisor
            .launch(reservation, &inv.command_line, &working_directory, policy)
        {
            Ok(run_id) => Ok(RunStarted {
                job_id: id.to_string(),
                run_id,
                command_line: inv.command_line,
                working_directory,
            }),
            Err(e) => {
                warn!(job = %id, error = %e, "failed to start job process");
                self.lifecycle.fail_before_spawn(id, &e)?;
                Err(e)
            }
        }
    }

    fn prepare(&self, job: &Job) -> Result<(Invocation, PathBuf)> {
        let jobs = self.job_table()?;
        let variables = self.store.load_variables()?;
        let inv = invocation::build(job, &jobs, &variables)?;

        let working_directory = resolve_working_directory(&inv.working_directory);
        if !working_directory.is_dir() {
            return Err(JobdagError::Validation(format!(
                "working directory does not exist: {}",
                working_directory.display()
            )));
        }
        Ok((inv, working_directory))
    }

    /// Request termination of `id`'s process. `false` if nothing is running;
    /// the job's status is then left alone.
    pub fn stop_job(&self, id: &str) -> bool {
        self.supervisor.stop(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.registry.is_running(id)
    }

    /// Reset a finished job to `idle`.
    pub fn clear_job(&self, id: &str) -> Result<Job> {
        self.lifecycle.clear(id)
    }

    pub async fn run_chain(&self, root: &str, mode: ChainMode) -> Result<ChainReport> {
        ChainRunner::new(self.clone())
            .with_step_timeout(self.options.chain_step_timeout)
            .run(root, mode)
            .await
    }

    pub fn argument_history(&self, job_id: &str, argument: &str) -> Result<Vec<String>> {
        self.store.list_argument_history(job_id, argument)
    }

    pub fn recent_working_directories(&self) -> Result<Vec<String>> {
        self.store.list_recent_working_directories()
    }

    pub fn variables(&self) -> Result<Variables> {
        self.store.load_variables()
    }

    pub fn set_variables(&self, variables: &Variables) -> Result<()> {
        self.store.save_variables(variables)
    }

    /// Stop every tracked process and wait for them to exit.
    ///
    /// Processes still alive after `timeout` get a second stop request,
    /// which kills them outright. Returns how many processes were asked to
    /// stop.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let stopped = self.registry.stop_all();
        info!(stopped, "shutting down; stopping tracked processes");

        if !self.wait_until_idle(timeout).await {
            let killed = self.registry.stop_all();
            warn!(killed, "processes still running after shutdown timeout; killing");
            self.wait_until_idle(Duration::from_secs(1)).await;
        }
        stopped
    }

    async fn wait_until_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.registry.wait_idle())
            .await
            .is_ok()
    }
}

impl JobLauncher for JobService {
    fn launch(&self, job_id: &str) -> Result<()> {
        self.run_job(job_id).map(|_| ())
    }

    fn status_of(&self, job_id: &str) -> Result<JobStatus> {
        Ok(self.job(job_id)?.status)
    }

    fn dependency_graph(&self) -> Result<DepGraph> {
        JobService::dependency_graph(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.subscribe()
    }
}

/// Empty means the user's home directory, falling back to the current one.
pub fn resolve_working_directory(dir: &str) -> PathBuf {
    if !dir.trim().is_empty() {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_commands_match_on_basename() {
        let opts = EngineOptions::default();
        let ping = opts.termination_policy("/usr/bin/ping -c 3 example.org");
        assert_eq!(ping, TerminationPolicy::interrupt(Duration::from_secs(30)));

        let other = opts.termination_policy("curl https://example.org");
        assert_eq!(other, TerminationPolicy::terminate(Duration::from_secs(2)));
    }

    #[test]
    fn explicit_working_directory_is_kept() {
        assert_eq!(resolve_working_directory("/tmp"), PathBuf::from("/tmp"));
        assert!(!resolve_working_directory("").as_os_str().is_empty());
    }
}
