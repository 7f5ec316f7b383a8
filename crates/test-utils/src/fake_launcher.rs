use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use jobdag::dag::DepGraph;
use jobdag::engine::JobLauncher;
use jobdag::errors::{JobdagError, Result};
use jobdag::events::{EventBus, JobEvent};
use jobdag::types::{JobId, JobStatus};

#[derive(Debug, Clone)]
enum Outcome {
    Finish(JobStatus),
    FailToLaunch(String),
    Hang,
}

#[derive(Debug, Default)]
struct FakeState {
    deps: HashMap<JobId, Vec<JobId>>,
    statuses: HashMap<JobId, JobStatus>,
    outcomes: HashMap<JobId, Outcome>,
    launched: Vec<JobId>,
}

/// A scripted launcher for chain tests that:
/// - records which jobs were launched, in order
/// - publishes `running` and then the scripted terminal status (default
///   `success`) on its own event bus, from a spawned task.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
    bus: EventBus,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            bus: EventBus::new(64),
        }
    }

    pub fn with_job(self, id: &str, deps: &[&str]) -> Self {
        {
            let mut s = self.state.lock();
            s.deps
                .insert(id.to_string(), deps.iter().map(|d| d.to_string()).collect());
            s.statuses.entry(id.to_string()).or_insert(JobStatus::Idle);
        }
        self
    }

    pub fn with_status(self, id: &str, status: JobStatus) -> Self {
        self.state.lock().statuses.insert(id.to_string(), status);
        self
    }

    pub fn finishing_with(self, id: &str, status: JobStatus) -> Self {
        self.state
            .lock()
            .outcomes
            .insert(id.to_string(), Outcome::Finish(status));
        self
    }

    pub fn failing_to_launch(self, id: &str, message: &str) -> Self {
        self.state
            .lock()
            .outcomes
            .insert(id.to_string(), Outcome::FailToLaunch(message.to_string()));
        self
    }

    pub fn hanging(self, id: &str) -> Self {
        self.state.lock().outcomes.insert(id.to_string(), Outcome::Hang);
        self
    }

    pub fn launched(&self) -> Vec<JobId> {
        self.state.lock().launched.clone()
    }

    pub fn status(&self, id: &str) -> JobStatus {
        self.state
            .lock()
            .statuses
            .get(id)
            .copied()
            .unwrap_or_default()
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLauncher for FakeLauncher {
    fn launch(&self, job_id: &str) -> Result<()> {
        let outcome = {
            let mut s = self.state.lock();
            let outcome = s
                .outcomes
                .get(job_id)
                .cloned()
                .unwrap_or(Outcome::Finish(JobStatus::Success));
            if let Outcome::FailToLaunch(message) = &outcome {
                s.statuses.insert(job_id.to_string(), JobStatus::Error);
                return Err(JobdagError::Validation(message.clone()));
            }
            s.launched.push(job_id.to_string());
            s.statuses.insert(job_id.to_string(), JobStatus::Running);
            outcome
        };

        self.bus.publish(JobEvent::StatusChanged {
            id: job_id.to_string(),
            status: JobStatus::Running,
            return_code: None,
        });

        if let Outcome::Finish(status) = outcome {
            let state = Arc::clone(&self.state);
            let bus = self.bus.clone();
            let id = job_id.to_string();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                state.lock().statuses.insert(id.clone(), status);
                let return_code = match status {
                    JobStatus::Success => Some(0),
                    JobStatus::Error => Some(1),
                    _ => None,
                };
                bus.publish(JobEvent::StatusChanged {
                    id,
                    status,
                    return_code,
                });
            });
        }
        Ok(())
    }

    fn status_of(&self, job_id: &str) -> Result<JobStatus> {
        self.state
            .lock()
            .statuses
            .get(job_id)
            .copied()
            .ok_or_else(|| JobdagError::JobNotFound(job_id.to_string()))
    }

    fn dependency_graph(&self) -> Result<DepGraph> {
        let deps = self.state.lock().deps.clone();
        Ok(DepGraph::from_edges(deps))
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.subscribe()
    }
}
