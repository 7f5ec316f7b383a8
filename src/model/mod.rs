// src/model/mod.rs

//! Data model for jobs, their arguments, and the variable mapping.
//!
//! - [`job`] holds [`Job`] (definition + run state) and [`JobDefinition`],
//!   the user-editable part of a job.
//! - [`argument`] holds [`Argument`] and its [`ArgumentSource`] variant.
//! - [`variables`] holds the flat `{{name}}` substitution mapping.

pub mod argument;
pub mod job;
pub mod variables;

pub use argument::{Argument, ArgumentSource};
pub use job::{Job, JobDefinition, OutputLine};
pub use variables::Variables;
