//! Execution plan - the validated, topologically ordered task graph

use crate::task::{DynTask, Lifecycle, TaskKey};
use std::collections::HashMap;

/// A registered task together with how it was submitted
#[derive(Debug)]
pub(crate) struct TaskNode {
    pub(crate) key: TaskKey,
    pub(crate) lifecycle: Lifecycle,
    /// Name of the builder that submitted the task
    pub(crate) source: String,
    pub(crate) task: Box<dyn DynTask>,
}

/// A graph that passed duplicate, reference and cycle checks
///
/// Nodes are stored in topological order: every task comes after all of
/// its dependencies. The plan is read-only once built.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub(crate) nodes: Vec<TaskNode>,
    pub(crate) dependencies: Vec<Vec<usize>>,
    pub(crate) dependents: Vec<Vec<usize>>,
    pub(crate) index: HashMap<TaskKey, usize>,
}

impl ExecutionPlan {
    /// Total number of tasks in the plan
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Task keys in topological order
    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.nodes.iter().map(|node| &node.key)
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.index.contains_key(key)
    }

    /// Direct dependencies of a task
    pub fn dependencies_of(&self, key: &TaskKey) -> Vec<&TaskKey> {
        self.index
            .get(key)
            .map(|&i| {
                self.dependencies[i]
                    .iter()
                    .map(|&d| &self.nodes[d].key)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tasks that directly depend on a task
    pub fn dependents_of(&self, key: &TaskKey) -> Vec<&TaskKey> {
        self.index
            .get(key)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| &self.nodes[d].key)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lifecycle_of(&self, key: &TaskKey) -> Option<Lifecycle> {
        self.index.get(key).map(|&i| self.nodes[i].lifecycle)
    }

    /// Builder that submitted a task
    pub fn source_of(&self, key: &TaskKey) -> Option<&str> {
        self.index.get(key).map(|&i| self.nodes[i].source.as_str())
    }

    /// Number of tasks of each kind
    pub fn count_by_kind(&self) -> std::collections::BTreeMap<&'static str, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.key.kind()).or_insert(0) += 1;
        }
        counts
    }
}
