//! Dependency graph builder
//!
//! Builders submit expected-state tasks into a [`TaskGraph`]; nothing runs
//! at this point. [`TaskGraph::build`] then checks references, derives the
//! dependency edges and orders the tasks, producing an [`ExecutionPlan`].

use crate::error::{Error, Result};
use crate::planner::{ExecutionPlan, TaskNode};
use crate::task::{Lifecycle, Task, TaskKey};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Something that contributes tasks to a graph
pub trait ModelBuilder {
    /// Name recorded as the submitter of every task this builder adds
    fn name(&self) -> &str;

    fn build(&self, graph: &mut TaskGraph) -> anyhow::Result<()>;
}

/// Lifecycle overrides keyed by task kind (`File`) or full key
/// (`File//etc/motd`); a key entry wins over a kind entry
#[derive(Debug, Clone, Default)]
pub struct LifecycleOverrides {
    by_kind: HashMap<String, Lifecycle>,
    by_key: HashMap<String, Lifecycle>,
}

impl LifecycleOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override; targets containing `/` are full keys
    pub fn insert(&mut self, target: impl Into<String>, lifecycle: Lifecycle) {
        let target = target.into();
        if target.contains('/') {
            self.by_key.insert(target, lifecycle);
        } else {
            self.by_kind.insert(target, lifecycle);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty() && self.by_key.is_empty()
    }

    fn resolve(&self, key: &TaskKey, requested: Lifecycle) -> Lifecycle {
        self.by_key
            .get(&key.to_string())
            .or_else(|| self.by_kind.get(key.kind()))
            .copied()
            .unwrap_or(requested)
    }
}

impl<S: Into<String>> FromIterator<(S, Lifecycle)> for LifecycleOverrides {
    fn from_iter<I: IntoIterator<Item = (S, Lifecycle)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (target, lifecycle) in iter {
            overrides.insert(target, lifecycle);
        }
        overrides
    }
}

/// Registry of submitted tasks, keyed by [`TaskKey`]
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskKey, usize>,
    explicit: Vec<(TaskKey, TaskKey)>,
    overrides: LifecycleOverrides,
    source: String,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: LifecycleOverrides) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }

    /// Name the builder whose submissions follow
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    /// Run a builder, recording it as the submitter of its tasks
    pub fn run_builder(&mut self, builder: &dyn ModelBuilder) -> anyhow::Result<()> {
        self.set_source(builder.name());
        log::debug!("Running model builder {}", builder.name());
        builder.build(self)
    }

    /// Add a task with the default `Sync` lifecycle
    pub fn add_task<T: Task>(&mut self, task: T) -> Result<()> {
        self.add_task_with_lifecycle(task, Lifecycle::Sync)
    }

    /// Add a task with an explicit lifecycle
    ///
    /// Submitting the same key twice is accepted only when both the task
    /// and the (overridden) lifecycle are identical.
    pub fn add_task_with_lifecycle<T: Task>(
        &mut self,
        task: T,
        lifecycle: Lifecycle,
    ) -> Result<()> {
        let key = Task::key(&task);
        let lifecycle = self.overrides.resolve(&key, lifecycle);

        if let Some(&existing) = self.index.get(&key) {
            let node = &self.nodes[existing];
            if node.lifecycle == lifecycle && node.task.same_as(&task) {
                log::debug!("{key}: identical duplicate from {}, keeping one", self.source);
                return Ok(());
            }
            return Err(Error::DuplicateTask {
                key,
                first: node.source.clone(),
                second: self.source.clone(),
            });
        }

        log::trace!("{key}: added by {} ({lifecycle})", self.source);
        self.index.insert(key.clone(), self.nodes.len());
        self.nodes.push(TaskNode {
            key,
            lifecycle,
            source: self.source.clone(),
            task: Box::new(task),
        });
        Ok(())
    }

    /// Declare that `dependent` must run after `dependency`
    pub fn add_dependency(&mut self, dependent: TaskKey, dependency: TaskKey) {
        self.explicit.push((dependent, dependency));
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Derive edges, check them, and order the tasks
    pub fn build(self) -> Result<ExecutionPlan> {
        let TaskGraph {
            nodes,
            index,
            explicit,
            ..
        } = self;

        let mut declared: Vec<BTreeSet<TaskKey>> = nodes
            .iter()
            .map(|node| node.task.dependencies().into_iter().collect())
            .collect();
        for (dependent, dependency) in explicit {
            let Some(&i) = index.get(&dependent) else {
                return Err(Error::UnknownDependent {
                    task: dependent,
                    dependency,
                });
            };
            declared[i].insert(dependency);
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), 0);
        let ids: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();
        for (i, deps) in declared.iter().enumerate() {
            for dep in deps {
                let Some(&j) = index.get(dep) else {
                    return Err(Error::MissingDependency {
                        task: nodes[i].key.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(ids[j], ids[i], ());
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => {
                let cycle = find_cycle(&graph)
                    .into_iter()
                    .map(|id| nodes[graph[id]].key.clone())
                    .collect();
                return Err(Error::Cycle { cycle });
            }
        };

        // Renumber so that position in `nodes` is topological position
        let mut position = vec![0; nodes.len()];
        for (pos, id) in order.iter().enumerate() {
            position[graph[*id]] = pos;
        }

        let mut slots: Vec<Option<TaskNode>> = nodes.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        let mut dependencies = Vec::with_capacity(slots.len());
        let mut dependents = Vec::with_capacity(slots.len());
        for id in &order {
            let original = graph[*id];
            if let Some(node) = slots[original].take() {
                ordered.push(node);
            }
            let mut deps: Vec<usize> = graph
                .neighbors_directed(*id, Direction::Incoming)
                .map(|n| position[graph[n]])
                .collect();
            deps.sort_unstable();
            dependencies.push(deps);
            let mut downstream: Vec<usize> = graph
                .neighbors_directed(*id, Direction::Outgoing)
                .map(|n| position[graph[n]])
                .collect();
            downstream.sort_unstable();
            dependents.push(downstream);
        }

        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, node)| (node.key.clone(), i))
            .collect();

        log::debug!("Built execution plan with {} tasks", ordered.len());

        Ok(ExecutionPlan {
            nodes: ordered,
            dependencies,
            dependents,
            index,
        })
    }
}

/// Pick a representative cycle: the shortest one through the lowest node
/// of the first strongly connected component that contains a cycle
fn find_cycle(graph: &DiGraph<usize, ()>) -> Vec<NodeIndex> {
    let cyclic = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| scc.into_iter().min())
        .min();
    let Some(start) = cyclic else {
        return Vec::new();
    };

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> =
            graph.neighbors_directed(node, Direction::Outgoing).collect();
        next.sort_unstable();
        for succ in next {
            if succ == start {
                let mut path = vec![node];
                let mut cur = node;
                while cur != start {
                    cur = parent[&cur];
                    path.push(cur);
                }
                path.reverse();
                return path;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(succ) {
                slot.insert(node);
                queue.push_back(succ);
            }
        }
    }
    vec![start]
}
