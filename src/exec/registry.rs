// src/exec/registry.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use crate::errors::{JobdagError, Result};
use crate::types::JobId;

/// A live process tracked for one job.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub run_id: u64,
    pub pid: Option<u32>,
    pub started_at: SystemTime,
    pub command_line: String,
    stop_tx: mpsc::UnboundedSender<()>,
    /// Set by the supervisor once `wait` has returned.
    exited: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new(
        run_id: u64,
        pid: Option<u32>,
        command_line: impl Into<String>,
        stop_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            run_id,
            pid,
            started_at: SystemTime::now(),
            command_line: command_line.into(),
            stop_tx,
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the supervisor, raised when the process is reaped.
    pub(crate) fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exited)
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Deliver a stop request to a process that has not been reaped yet.
    fn send_stop(&self) -> bool {
        !self.has_exited() && self.stop_tx.send(()).is_ok()
    }
}

#[derive(Debug)]
enum Slot {
    /// A run was accepted but the process is not spawned yet.
    Reserved { run_id: u64 },
    Running(ProcessHandle),
}

impl Slot {
    fn run_id(&self) -> u64 {
        match self {
            Slot::Reserved { run_id } => *run_id,
            Slot::Running(h) => h.run_id,
        }
    }
}

/// Table of running processes keyed by job id.
///
/// One instance is created per engine and shared by the service, the
/// supervisor and the lifecycle. A slot is claimed atomically with
/// [`ProcessRegistry::reserve`], so two concurrent run requests for the same
/// job can never both spawn.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    slots: Mutex<HashMap<JobId, Slot>>,
    next_run_id: AtomicU64,
    released: Notify,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the slot for `job_id`, failing if a run is already tracked.
    ///
    /// The slot is released again when the returned guard is dropped without
    /// being attached to a process.
    pub fn reserve(self: &Arc<Self>, job_id: &str) -> Result<Reservation> {
        let mut slots = self.slots.lock();
        if slots.contains_key(job_id) {
            return Err(JobdagError::AlreadyRunning(job_id.to_string()));
        }
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed) + 1;
        slots.insert(job_id.to_string(), Slot::Reserved { run_id });
        debug!(job = %job_id, run_id, "reserved process slot");

        Ok(Reservation {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
            run_id,
            armed: true,
        })
    }

    /// Turn a reservation into a tracked process.
    pub fn attach(&self, mut reservation: Reservation, handle: ProcessHandle) {
        reservation.armed = false;
        debug_assert_eq!(reservation.run_id, handle.run_id);
        info!(
            job = %reservation.job_id,
            run_id = handle.run_id,
            pid = ?handle.pid,
            "tracking process"
        );
        self.slots
            .lock()
            .insert(reservation.job_id.clone(), Slot::Running(handle));
    }

    /// Drop the entry for `job_id` if it still belongs to `run_id`.
    pub fn release(&self, job_id: &str, run_id: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(job_id) {
            Some(slot) if slot.run_id() == run_id => {
                slots.remove(job_id);
                debug!(job = %job_id, run_id, "released process slot");
                self.released.notify_waiters();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.slots.lock().contains_key(job_id)
    }

    /// Run id currently owning the slot for `job_id`.
    pub fn current_run(&self, job_id: &str) -> Option<u64> {
        self.slots.lock().get(job_id).map(Slot::run_id)
    }

    /// Ask the supervisor of `job_id` to terminate it.
    ///
    /// Returns `true` iff a live process was tracked and the request was
    /// delivered. A process that already exited but whose slot is not yet
    /// released counts as not running. A second request escalates straight
    /// to SIGKILL.
    pub fn request_stop(&self, job_id: &str) -> bool {
        match self.slots.lock().get(job_id) {
            Some(Slot::Running(h)) => h.send_stop(),
            _ => false,
        }
    }

    /// Request termination of every tracked process. Returns how many were
    /// signalled.
    pub fn stop_all(&self) -> usize {
        let slots = self.slots.lock();
        slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Running(h) => Some(h),
                Slot::Reserved { .. } => None,
            })
            .filter(|h| h.send_stop())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Resolve once no slot is held.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            if self.is_empty() {
                return;
            }
            released.await;
        }
    }
}

/// Claim on a registry slot for a run that has not spawned yet.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<ProcessRegistry>,
    job_id: JobId,
    run_id: u64,
    armed: bool,
}

impl Reservation {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(&self.job_id, self.run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_is_rejected_and_keeps_the_first() {
        let registry = ProcessRegistry::new();
        let first = registry.reserve("a").unwrap();
        let err = registry.reserve("a").unwrap_err();
        assert!(matches!(err, JobdagError::AlreadyRunning(id) if id == "a"));
        assert_eq!(registry.current_run("a"), Some(first.run_id()));
    }

    #[test]
    fn dropped_reservation_frees_the_slot() {
        let registry = ProcessRegistry::new();
        drop(registry.reserve("a").unwrap());
        assert!(!registry.is_running("a"));
        assert!(registry.reserve("a").is_ok());
    }

    #[test]
    fn stale_release_does_not_remove_a_newer_run() {
        let registry = ProcessRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let res = registry.reserve("a").unwrap();
        let run_id = res.run_id();
        registry.attach(res, ProcessHandle::new(run_id, Some(1), "true", tx));

        assert!(!registry.release("a", run_id + 100));
        assert!(registry.is_running("a"));
        assert!(registry.release("a", run_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_without_a_process_is_a_no_op() {
        let registry = ProcessRegistry::new();
        assert!(!registry.request_stop("a"));
        let _res = registry.reserve("a").unwrap();
        assert!(!registry.request_stop("a"));
    }

    #[test]
    fn stop_request_reaches_the_supervisor() {
        let registry = ProcessRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let res = registry.reserve("a").unwrap();
        let run_id = res.run_id();
        registry.attach(res, ProcessHandle::new(run_id, None, "sleep 5", tx));

        assert!(registry.request_stop("a"));
        assert_eq!(rx.try_recv(), Ok(()));
        assert_eq!(registry.stop_all(), 1);
    }

    #[test]
    fn reaped_process_is_not_reported_as_stopped() {
        let registry = ProcessRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let res = registry.reserve("a").unwrap();
        let run_id = res.run_id();
        let handle = ProcessHandle::new(run_id, Some(1), "true", tx);
        let exited = handle.exit_flag();
        registry.attach(res, handle);

        exited.store(true, Ordering::Release);

        // Slot is still held until the lifecycle releases it.
        assert!(registry.is_running("a"));
        assert!(!registry.request_stop("a"));
        assert_eq!(registry.stop_all(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_idle_wakes_when_the_last_slot_is_released() {
        let registry = ProcessRegistry::new();
        let res = registry.reserve("a").unwrap();

        let waiter = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.wait_idle().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(res);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on release")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_returns_at_once_when_nothing_runs() {
        let registry = ProcessRegistry::new();
        tokio::time::timeout(std::time::Duration::from_millis(50), registry.wait_idle())
            .await
            .expect("idle registry");
    }
}
