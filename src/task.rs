//! The immutable task type supplied by the upstream planner, and the plan
//! envelope the executor consumes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// An immutable unit of work as declared by the planner. All fields besides
/// `id` are informational — identity is by `id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub agent: String,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub estimated_minutes: Option<f64>,
    #[serde(default = "default_can_run_in_parallel")]
    pub can_run_in_parallel: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_priority() -> u8 {
    50
}

fn default_can_run_in_parallel() -> bool {
    true
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent: agent.into(),
            dependencies: HashSet::new(),
            priority: default_priority(),
            estimated_minutes: None,
            can_run_in_parallel: default_can_run_in_parallel(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_dependencies(mut self, dependencies: HashSet<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    pub fn with_estimated_minutes(mut self, minutes: f64) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// `true` when the task's name contains a keyword the priority-bucket
    /// heuristic treats as a signal, e.g. "critical".
    pub fn name_signals_critical(&self) -> bool {
        self.name.to_lowercase().contains("critical")
    }
}

/// Aggregate counters describing a plan, supplied alongside the task graph.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub total_tasks: usize,
}

/// The graph of tasks as handed down by the upstream planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: HashMap<String, Task>,
}

/// Top-level input to [`crate::executor::Executor::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub project_name: String,
    pub statistics: PlanStatistics,
    pub task_graph: TaskGraph,
}

impl ExecutionPlan {
    pub fn new(project_name: impl Into<String>, tasks: Vec<Task>) -> Self {
        let mut map = HashMap::new();
        for task in tasks {
            map.insert(task.id.clone(), task);
        }
        let total_tasks = map.len();
        Self {
            project_name: project_name.into(),
            statistics: PlanStatistics { total_tasks },
            task_graph: TaskGraph { tasks: map },
        }
    }

    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.task_graph.tasks.values().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_new_computes_total_tasks() {
        let plan = ExecutionPlan::new(
            "demo",
            vec![Task::new("a", "Task A", "worker"), Task::new("b", "Task B", "worker")],
        );
        assert_eq!(plan.statistics.total_tasks, 2);
        assert_eq!(plan.tasks().len(), 2);
    }

    #[test]
    fn test_name_signals_critical() {
        let task = Task::new("a", "Critical hotfix", "worker");
        assert!(task.name_signals_critical());
        let task = Task::new("b", "Routine cleanup", "worker");
        assert!(!task.name_signals_critical());
    }
}
