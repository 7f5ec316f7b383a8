#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use jobdag::engine::{EngineOptions, JobService};
use jobdag::events::JobEvent;
use jobdag::store::{JobStore, MemoryJobStore};
use jobdag::types::JobStatus;

pub use jobdag_test_utils::builders;
pub use jobdag_test_utils::{init_tracing, with_timeout};

/// Engine options with short grace periods so stop tests stay fast.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        grace_period: Duration::from_millis(300),
        interrupt_grace_period: Duration::from_millis(300),
        drain_timeout: Duration::from_millis(200),
        ..EngineOptions::default()
    }
}

/// A service over a fresh in-memory store.
pub fn memory_service() -> (JobService, Arc<dyn JobStore>) {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let service = JobService::start(Arc::clone(&store), fast_options());
    (service, store)
}

/// Wait for the next terminal status of `id`.
pub async fn next_terminal(rx: &mut broadcast::Receiver<JobEvent>, id: &str) -> JobStatus {
    loop {
        match rx.recv().await {
            Ok(JobEvent::StatusChanged { id: ev_id, status, .. })
                if ev_id == id && status.is_terminal() =>
            {
                return status;
            }
            Ok(_) => {}
            Err(e) => panic!("event bus error while waiting for {id}: {e}"),
        }
    }
}
