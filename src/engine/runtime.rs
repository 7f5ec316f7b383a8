// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::exec::ProcessEvent;

use super::lifecycle::Lifecycle;

/// Applies supervisor events to job state.
///
/// A single task consumes the one `ProcessEvent` channel, so output and exit
/// of a given job are applied in the order the supervisor produced them and
/// the terminal status is always published after the last output line.
pub struct Runtime {
    lifecycle: Lifecycle,
    event_rx: mpsc::Receiver<ProcessEvent>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(lifecycle: Lifecycle, event_rx: mpsc::Receiver<ProcessEvent>) -> Self {
        Self {
            lifecycle,
            event_rx,
        }
    }

    /// Main event loop. Returns once every sender is gone.
    pub async fn run(mut self) {
        info!("jobdag runtime started");

        while let Some(event) = self.event_rx.recv().await {
            self.handle(event);
        }

        info!("runtime event channel closed; exiting");
    }

    fn handle(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output {
                job_id,
                run_id,
                stream,
                content,
            } => {
                debug!(job = %job_id, %stream, "{}", content);
                if let Err(e) = self.lifecycle.record_output(&job_id, run_id, stream, content) {
                    error!(job = %job_id, error = %e, "failed to record output");
                }
            }
            ProcessEvent::Exited {
                job_id,
                run_id,
                exit,
            } => {
                if let Err(e) = self.lifecycle.finish(&job_id, run_id, exit) {
                    error!(job = %job_id, error = %e, "failed to record job exit");
                }
            }
        }
    }
}
