// src/engine/mod.rs

//! Orchestration engine for jobdag.
//!
//! - [`lifecycle`] is the job status state machine: transitions, storage
//!   and notifications.
//! - [`runtime`] is the event loop applying supervisor events in order.
//! - [`service`] exposes the boundary commands (create, update, delete,
//!   run, stop, clear, chain, shutdown).
//! - [`chain`] runs a job's dependency chain one job at a time.

pub mod chain;
pub mod lifecycle;
pub mod runtime;
pub mod service;

pub use chain::{ChainReport, ChainRunner, JobLauncher};
pub use lifecycle::{can_transition, terminal_status, Lifecycle};
pub use runtime::Runtime;
pub use service::{resolve_working_directory, EngineOptions, JobService, RunStarted};
