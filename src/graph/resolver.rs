//! Dependency graph construction, cycle detection, and readiness queries.
//!
//! Owns the DAG implied by a task set's declared dependencies. Readiness is
//! derived on demand from each node's `completed` flag rather than from a
//! shrinking live set, so the same graph can be queried repeatedly without
//! rebuilding. [`DependencyResolver::mark_failed`] is the one operation that
//! mutates a node's static dependency set, splicing a terminally-failed id
//! out of its dependents so the DAG can keep making progress around it.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

use crate::graph::error::{GraphError, GraphResult};
use crate::task::Task;

/// A single task's position in the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub task_id: String,
    /// Ids this task depends on. Shrinks only when a dependency is spliced
    /// out via [`DependencyResolver::mark_failed`] with `unblock_dependents`.
    pub dependencies: HashSet<String>,
    /// Ids that depend on this task (reverse edges).
    pub dependents: HashSet<String>,
    pub completed: bool,
    pub in_progress: bool,
    pub failed: bool,
}

impl DependencyNode {
    fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
            completed: false,
            in_progress: false,
            failed: false,
        }
    }
}

/// Partition of non-terminal nodes returned by [`DependencyResolver::ready_tasks`].
#[derive(Debug, Clone, Default)]
pub struct ReadyPartition {
    pub ready: Vec<String>,
    pub blocked: Vec<String>,
}

struct GraphState {
    nodes: HashMap<String, DependencyNode>,
}

impl GraphState {
    fn is_ready(&self, node: &DependencyNode) -> bool {
        if node.completed || node.failed || node.in_progress {
            return false;
        }
        node.dependencies
            .iter()
            .all(|dep| self.nodes.get(dep).map(|n| n.completed).unwrap_or(true))
    }

    /// DFS cycle detection over the whole graph. Returns every distinct
    /// cycle found, each as the ordered path walked back to its repeated id.
    fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();

        for start in ids {
            if visited.contains(start) {
                continue;
            }
            let mut stack = Vec::new();
            self.dfs(start, &mut visited, &mut stack, &mut cycles);
        }
        cycles
    }

    fn dfs(
        &self,
        node_id: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if let Some(pos) = stack.iter().position(|id| id == node_id) {
            let mut cycle: Vec<String> = stack[pos..].to_vec();
            cycle.push(node_id.to_string());
            cycles.push(cycle);
            return;
        }
        if visited.contains(node_id) {
            return;
        }
        visited.insert(node_id.to_string());
        stack.push(node_id.to_string());

        if let Some(node) = self.nodes.get(node_id) {
            let mut deps: Vec<&String> = node.dependencies.iter().collect();
            deps.sort();
            for dep in deps {
                self.dfs(dep, visited, stack, cycles);
            }
        }
        stack.pop();
    }

    /// Longest path (in hop count) from `start` to any sink, memoized.
    fn longest_path_from(&self, start: &str, memo: &mut HashMap<String, Vec<String>>) -> Vec<String> {
        if let Some(cached) = memo.get(start) {
            return cached.clone();
        }
        let node = match self.nodes.get(start) {
            Some(n) => n,
            None => return vec![start.to_string()],
        };

        let mut dependents: Vec<&String> = node.dependents.iter().collect();
        dependents.sort();

        let mut best: Vec<String> = vec![start.to_string()];
        for dep in dependents {
            let candidate = self.longest_path_from(dep, memo);
            let mut extended = vec![start.to_string()];
            extended.extend(candidate);
            if extended.len() > best.len()
                || (extended.len() == best.len() && extended < best)
            {
                best = extended;
            }
        }
        memo.insert(start.to_string(), best.clone());
        best
    }
}

/// Owns the DAG implied by a task set and answers readiness / traversal
/// queries against it. Cheap to clone-share via `Arc` — all mutators lock
/// a single internal monitor.
pub struct DependencyResolver {
    state: Mutex<GraphState>,
}

impl DependencyResolver {
    /// Build the graph from `tasks`, populating reverse edges and rejecting
    /// cyclic dependency declarations.
    ///
    /// This is the only fatal operation in the resolver: every other query
    /// returns an empty result for unknown ids rather than erroring.
    pub fn build(tasks: &[Task]) -> GraphResult<Self> {
        let mut nodes: HashMap<String, DependencyNode> = HashMap::new();
        for task in tasks {
            nodes.insert(task.id.clone(), DependencyNode::new(task.id.clone()));
        }
        for task in tasks {
            for dep in &task.dependencies {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        dependent: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                nodes.get_mut(&task.id).unwrap().dependencies.insert(dep.clone());
                nodes.get_mut(dep).unwrap().dependents.insert(task.id.clone());
            }
        }

        let state = GraphState { nodes };
        let cycles = state.find_cycles();
        if !cycles.is_empty() {
            return Err(GraphError::Cycle { cycles });
        }

        tracing::debug!(task_count = tasks.len(), "dependency graph built");
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Partition all non-terminal nodes into ready / blocked.
    pub async fn ready_tasks(&self) -> ReadyPartition {
        let state = self.state.lock().await;
        let mut partition = ReadyPartition::default();
        let mut ids: Vec<&String> = state.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &state.nodes[id];
            if node.completed || node.failed {
                continue;
            }
            if state.is_ready(node) {
                partition.ready.push(id.clone());
            } else {
                partition.blocked.push(id.clone());
            }
        }
        partition
    }

    /// Mark a task as having begun execution.
    pub async fn mark_started(&self, task_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.get_mut(task_id) {
            node.in_progress = true;
        }
    }

    /// Mark a task as completed successfully. Idempotent.
    pub async fn mark_completed(&self, task_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.get_mut(task_id) {
            node.in_progress = false;
            node.completed = true;
        }
        tracing::trace!(task_id, "graph node marked completed");
    }

    /// Mark a task as terminally failed.
    ///
    /// When `unblock_dependents` is true, `task_id` is spliced out of every
    /// dependent's dependency set so the DAG can keep making progress around
    /// the failure. Once unblocked, dependents stay unblocked permanently —
    /// there is no re-attachment path.
    pub async fn mark_failed(&self, task_id: &str, unblock_dependents: bool) {
        let mut state = self.state.lock().await;
        let dependents = match state.nodes.get_mut(task_id) {
            Some(node) => {
                node.in_progress = false;
                node.failed = true;
                node.dependents.clone()
            }
            None => return,
        };
        if unblock_dependents {
            for dependent_id in dependents {
                if let Some(dependent) = state.nodes.get_mut(&dependent_id) {
                    dependent.dependencies.remove(task_id);
                }
            }
            tracing::warn!(task_id, "task failed terminally; dependents unblocked");
        }
    }

    /// Longest dependency chain (by hop count) to any sink, starting from
    /// whichever source produces the longest overall path. Ties are broken
    /// by lexicographic id at every branch point, making the result fully
    /// deterministic.
    pub async fn critical_path(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut memo: HashMap<String, Vec<String>> = HashMap::new();
        let mut sources: Vec<&String> = state
            .nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| &n.task_id)
            .collect();
        sources.sort();

        let mut best: Vec<String> = Vec::new();
        for source in sources {
            let path = state.longest_path_from(source, &mut memo);
            if path.len() > best.len() || (path.len() == best.len() && path < best) {
                best = path;
            }
        }
        best
    }

    /// All transitive predecessors (dependencies-of-dependencies) of `id`,
    /// excluding `id` itself. Returns an empty set for unknown ids.
    pub async fn dependency_tree(&self, task_id: &str) -> HashSet<String> {
        let state = self.state.lock().await;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = state.nodes.get(task_id) {
            queue.extend(node.dependencies.iter().cloned());
        }
        while let Some(current) = queue.pop_front() {
            if visited.insert(current.clone()) {
                if let Some(node) = state.nodes.get(&current) {
                    for dep in &node.dependencies {
                        if !visited.contains(dep) {
                            queue.push_back(dep.clone());
                        }
                    }
                }
            }
        }
        visited
    }

    /// Level-order grouping of `ids` into rounds that can run in parallel.
    ///
    /// A round emits every id in `ids` whose dependencies *within `ids`* have
    /// already been emitted in a prior round (dependencies outside `ids` are
    /// treated as externally satisfied). Stops as soon as a round would emit
    /// nothing, so a residual cycle among `ids` simply truncates the output
    /// rather than looping forever.
    pub async fn parallelizable_groups(&self, ids: &[String]) -> Vec<Vec<String>> {
        let state = self.state.lock().await;
        let id_set: HashSet<&String> = ids.iter().collect();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut remaining: Vec<String> = ids.to_vec();
        let mut groups = Vec::new();

        loop {
            let mut round: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    state
                        .nodes
                        .get(*id)
                        .map(|node| {
                            node.dependencies
                                .iter()
                                .all(|dep| !id_set.contains(dep) || emitted.contains(dep))
                        })
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if round.is_empty() {
                break;
            }
            round.sort();
            for id in &round {
                emitted.insert(id.clone());
            }
            remaining.retain(|id| !round.contains(id));
            groups.push(round);
        }
        groups
    }
}
