// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`registry`] is the table of running processes keyed by job id.
//! - [`supervisor`] spawns processes, streams their output and runs the
//!   escalating termination protocol.
//! - [`signal`] sends signals to a child's process group.
//!
//! Everything a running process produces reaches the engine as a
//! [`ProcessEvent`] on one mpsc channel, so per-job ordering is the order
//! of that channel.

pub mod registry;
pub mod signal;
pub mod supervisor;

use crate::types::{JobId, OutputStream};

pub use registry::{ProcessHandle, ProcessRegistry, Reservation};
pub use signal::TerminationSignal;
pub use supervisor::{Supervisor, TerminationPolicy};

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if it was killed by one.
    pub signal: Option<i32>,
    /// A stop was requested while it ran.
    pub stop_requested: bool,
}

/// Events flowing from supervised processes into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output {
        job_id: JobId,
        run_id: u64,
        stream: OutputStream,
        content: String,
    },
    Exited {
        job_id: JobId,
        run_id: u64,
        exit: ProcessExit,
    },
}
