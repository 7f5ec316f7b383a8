// src/invocation/mod.rs

//! Turning a job definition into a concrete command line.
//!
//! - [`builder`] resolves arguments in order and renders argv tokens.
//! - [`extract`] applies an argument's regex to a dependency's captured
//!   stdout.

pub mod builder;
pub mod extract;

pub use builder::{build, HistoryEntry, Invocation, JobTable, ResolvedArgument};
pub use extract::test_extraction;
