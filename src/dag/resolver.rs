// src/dag/resolver.rs

//! Cycle checks and chain ordering over a [`DepGraph`] snapshot.

use std::collections::HashSet;

use tracing::debug;

use crate::dag::graph::DepGraph;
use crate::errors::{JobdagError, Result};
use crate::types::JobId;

/// Transitive closure of dependencies of `id` (not including `id` itself,
/// unless it sits on a cycle).
pub fn ancestors(graph: &DepGraph, id: &str) -> HashSet<JobId> {
    let mut visited: HashSet<JobId> = HashSet::new();
    let mut stack: Vec<&str> = graph.dependencies_of(id).iter().map(String::as_str).collect();

    while let Some(current) = stack.pop() {
        if !visited.insert(current.to_string()) {
            continue;
        }
        stack.extend(graph.dependencies_of(current).iter().map(String::as_str));
    }

    visited
}

/// Reject `new_deps` for `job` if any of them would close a cycle.
///
/// A new dependency `d` closes a cycle when `d == job` or `job` is already an
/// ancestor of `d`.
pub fn check_new_dependencies(graph: &DepGraph, job: &str, new_deps: &[JobId]) -> Result<()> {
    for dep in new_deps {
        if dep == job || ancestors(graph, dep).contains(job) {
            debug!(job = %job, dependency = %dep, "rejecting dependency that closes a cycle");
            return Err(JobdagError::CircularDependency {
                job: job.to_string(),
                dependency: dep.clone(),
            });
        }
    }
    Ok(())
}

/// Dependencies present in `next` but not in `previous`.
pub fn added_dependencies(previous: &[JobId], next: &[JobId]) -> Vec<JobId> {
    next.iter()
        .filter(|dep| !previous.contains(dep))
        .cloned()
        .collect()
}

/// Execution order for a chain rooted at `root`.
///
/// Post-order DFS: every dependency is listed before the jobs that need it,
/// each job exactly once (diamonds included), in first-discovered order.
/// Dependencies that are not part of the graph are skipped here; running the
/// dependent later surfaces them as unsatisfied.
pub fn chain_order(graph: &DepGraph, root: &str) -> Result<Vec<JobId>> {
    if !graph.contains(root) {
        return Err(JobdagError::JobNotFound(root.to_string()));
    }

    let mut visited: HashSet<JobId> = HashSet::new();
    let mut order: Vec<JobId> = Vec::new();
    visit(graph, root, &mut visited, &mut order);

    debug!(root = %root, ?order, "computed chain order");
    Ok(order)
}

fn visit(graph: &DepGraph, id: &str, visited: &mut HashSet<JobId>, order: &mut Vec<JobId>) {
    if !graph.contains(id) || !visited.insert(id.to_string()) {
        return;
    }
    for dep in graph.dependencies_of(id) {
        visit(graph, dep, visited, order);
    }
    order.push(id.to_string());
}
