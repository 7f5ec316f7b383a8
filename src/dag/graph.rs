// src/dag/graph.rs

use std::collections::HashMap;

use crate::model::Job;
use crate::types::JobId;

#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies (explicit + implicit), in discovery order.
    deps: Vec<JobId>,
}

/// In-memory snapshot of the job dependency graph keyed by job id.
///
/// Built from a list of jobs and never touches the store afterwards, so every
/// check over it is a pure function of the snapshot. Edges to ids that are
/// not part of the snapshot are kept in `deps` (so callers can report them)
/// but have no node of their own.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: HashMap<JobId, DagNode>,
}

impl DepGraph {
    /// Build a graph from jobs using their effective dependencies.
    pub fn from_jobs<'a, I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        Self::from_edges(
            jobs.into_iter()
                .map(|job| (job.id.clone(), job.effective_dependencies())),
        )
    }

    /// Build a graph from `(job, direct dependencies)` pairs.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (JobId, Vec<JobId>)>,
    {
        let nodes = edges
            .into_iter()
            .map(|(id, deps)| (id, DagNode { deps }))
            .collect();
        Self { nodes }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// A copy of this graph where `id` has exactly `deps` as its direct
    /// dependencies. Used to validate an edit before it is persisted.
    pub fn with_dependencies(&self, id: &str, deps: Vec<JobId>) -> Self {
        let edges = self
            .nodes
            .iter()
            .filter(|(other, _)| other.as_str() != id)
            .map(|(other, node)| (other.clone(), node.deps.clone()))
            .chain(std::iter::once((id.to_string(), deps)));
        Self::from_edges(edges)
    }
}
