// src/dag/mod.rs

//! Job dependency graph and ordering.
//!
//! - [`graph`] holds a snapshot of the dependency graph (explicit edges plus
//!   the implicit ones inferred from `FromOutput` arguments).
//! - [`resolver`] computes ancestors, rejects edits that would close a
//!   cycle, and produces chain execution order.

pub mod graph;
pub mod resolver;

pub use graph::DepGraph;
pub use resolver::{added_dependencies, ancestors, chain_order, check_new_dependencies};
