//! Priority-aware task queue: holds `QueuedTask` records keyed by id and
//! enforces the state machine, retry policy, and timeout detection.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::TaskQueueConfig;
use crate::events::{EventKind, EventLog, ExecutionEvent};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Ready,
    Blocked,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBucket {
    Critical,
    High,
    Normal,
    Low,
}

impl PriorityBucket {
    pub fn weight(self) -> u8 {
        match self {
            PriorityBucket::Critical => 100,
            PriorityBucket::High => 75,
            PriorityBucket::Normal => 50,
            PriorityBucket::Low => 25,
        }
    }

    /// Derive the bucket from raw priority, a name-keyword signal, and the
    /// agent role. Numeric priority dominates; the keyword signal can only
    /// push a task up into `critical`.
    pub fn derive(task: &Task) -> Self {
        if task.name_signals_critical() || task.priority >= 90 {
            return PriorityBucket::Critical;
        }
        if task.priority >= 70 {
            return PriorityBucket::High;
        }
        if task.priority >= 30 {
            return PriorityBucket::Normal;
        }
        PriorityBucket::Low
    }
}

/// A task as tracked by the queue: the immutable [`Task`] plus everything
/// that changes over its lifetime.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,
    pub priority_bucket: PriorityBucket,
    pub status: TaskStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub retry_count: u32,
    /// Live dependency set; shrinks as dependencies complete.
    pub dependencies: HashSet<String>,
    pub dependents: HashSet<String>,
}

struct QueueState {
    tasks: HashMap<String, QueuedTask>,
    log: EventLog,
}

/// Owns every `QueuedTask`. All mutators serialize through one internal
/// monitor, matching the dependency resolver and worker pool.
pub struct TaskQueue {
    config: TaskQueueConfig,
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                tasks: HashMap::new(),
                log: EventLog::new("queue"),
            }),
        }
    }

    /// Enqueue every task in `tasks` at once, computing both the live
    /// dependency sets and their reverse (`dependents`) edges in a single
    /// pass so ordering among `tasks` doesn't matter.
    pub async fn enqueue_all(&self, tasks: &[Task]) {
        let mut state = self.state.lock().await;
        for task in tasks {
            let blocked = !task.dependencies.is_empty();
            let queued = QueuedTask {
                priority_bucket: PriorityBucket::derive(task),
                status: if blocked { TaskStatus::Blocked } else { TaskStatus::Queued },
                queued_at: Utc::now(),
                started_at: None,
                completed_at: None,
                worker_id: None,
                retry_count: 0,
                dependencies: task.dependencies.clone(),
                dependents: HashSet::new(),
                task: task.clone(),
            };
            state.tasks.insert(task.id.clone(), queued);
        }
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        for id in &ids {
            let deps: Vec<String> = state.tasks[id].dependencies.iter().cloned().collect();
            for dep in deps {
                if let Some(dep_task) = state.tasks.get_mut(&dep) {
                    dep_task.dependents.insert(id.clone());
                }
            }
        }
        for id in &ids {
            state.log.record_full(blank_event(EventKind::TaskQueued).with_task(id.clone()));
        }
    }

    /// Highest-priority `ready|queued` task, FIFO tie-broken by `queued_at`.
    /// Pure FIFO when `priority_scheduling` is disabled.
    pub async fn next_ready(&self) -> Option<String> {
        let state = self.state.lock().await;
        let mut candidates: Vec<&QueuedTask> = state
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Ready))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        if self.config.priority_scheduling {
            candidates.sort_by(|a, b| {
                b.priority_bucket
                    .weight()
                    .cmp(&a.priority_bucket.weight())
                    .then_with(|| a.queued_at.cmp(&b.queued_at))
                    .then_with(|| a.task.id.cmp(&b.task.id))
            });
        } else {
            candidates.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.task.id.cmp(&b.task.id)));
        }
        Some(candidates[0].task.id.clone())
    }

    /// Every `ready|queued` task, for the scheduler (C4) to pick among. Order
    /// is unspecified; `scheduler::select` does its own ordering per strategy.
    pub async fn ready_candidates(&self) -> Vec<QueuedTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Ready))
            .cloned()
            .collect()
    }

    pub async fn mark_started(&self, id: &str, worker_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(t) = state.tasks.get_mut(id) {
            t.status = TaskStatus::Running;
            t.started_at = Some(Utc::now());
            t.worker_id = Some(worker_id.to_string());
        }
        state
            .log
            .record_full(blank_event(EventKind::TaskStarted).with_task(id).with_worker(worker_id));
    }

    /// Mark `id` completed and unblock any dependent whose live dependency
    /// set has just emptied.
    pub async fn mark_completed(&self, id: &str) {
        let mut state = self.state.lock().await;
        let dependents = match state.tasks.get_mut(id) {
            Some(t) => {
                t.status = TaskStatus::Completed;
                t.completed_at = Some(Utc::now());
                t.dependents.clone()
            }
            None => return,
        };
        for dep_id in dependents {
            if let Some(dependent) = state.tasks.get_mut(&dep_id) {
                dependent.dependencies.remove(id);
                if dependent.dependencies.is_empty() && dependent.status == TaskStatus::Blocked {
                    dependent.status = TaskStatus::Ready;
                }
            }
        }
        state.log.record_full(blank_event(EventKind::TaskCompleted).with_task(id));
    }

    /// Mark `id` failed. Returns whether the task was re-queued for retry.
    pub async fn mark_failed(&self, id: &str, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        let will_retry = {
            let t = match state.tasks.get_mut(id) {
                Some(t) => t,
                None => return false,
            };
            let can_retry = self.config.retry_failed_tasks && t.retry_count < self.config.max_retries;
            if can_retry {
                t.retry_count += 1;
                t.status = TaskStatus::Queued;
                t.worker_id = None;
                t.started_at = None;
            } else {
                t.status = TaskStatus::Failed;
            }
            can_retry
        };
        state.log.record_full(
            blank_event(EventKind::TaskFailed)
                .with_task(id)
                .with_details(serde_json::json!({ "reason": reason, "will_retry": will_retry })),
        );
        will_retry
    }

    /// Terminally-failed dependents never re-block; this splices `id` out of
    /// every dependent's live set once it has exhausted retries, mirroring
    /// [`crate::graph::DependencyResolver::mark_failed`].
    pub async fn unblock_dependents_of(&self, id: &str) {
        let mut state = self.state.lock().await;
        let dependents = match state.tasks.get(id) {
            Some(t) => t.dependents.clone(),
            None => return,
        };
        for dep_id in dependents {
            if let Some(dependent) = state.tasks.get_mut(&dep_id) {
                dependent.dependencies.remove(id);
                if dependent.dependencies.is_empty() && dependent.status == TaskStatus::Blocked {
                    dependent.status = TaskStatus::Ready;
                }
            }
        }
    }

    /// Any `running` task whose elapsed time since `started_at` exceeds the
    /// configured timeout. The caller is responsible for marking it failed.
    pub async fn check_timeouts(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let limit = chrono::Duration::milliseconds(self.config.task_timeout_ms as i64);
        let mut timed_out: Vec<String> = state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.started_at.map(|s| now - s > limit).unwrap_or(false)
            })
            .map(|t| t.task.id.clone())
            .collect();
        timed_out.sort();
        timed_out
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        !state.tasks.values().any(|t| {
            matches!(
                t.status,
                TaskStatus::Queued | TaskStatus::Ready | TaskStatus::Running | TaskStatus::Blocked
            )
        })
    }

    pub async fn get(&self, id: &str) -> Option<QueuedTask> {
        self.state.lock().await.tasks.get(id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<QueuedTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    pub async fn events(&self) -> Vec<ExecutionEvent> {
        self.state.lock().await.log.snapshot()
    }
}

fn blank_event(kind: EventKind) -> ExecutionEvent {
    ExecutionEvent {
        timestamp: Utc::now(),
        kind,
        task_id: None,
        worker_id: None,
        details: None,
        emitter: "queue",
        sequence: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, id, "worker").with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[tokio::test]
    async fn test_enqueue_blocks_tasks_with_dependencies() {
        let queue = TaskQueue::new(TaskQueueConfig::default());
        queue.enqueue_all(&[task("a", &[]), task("b", &["a"])]).await;
        assert_eq!(queue.get("a").await.unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.get("b").await.unwrap().status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn test_next_ready_picks_by_priority_then_fifo() {
        let queue = TaskQueue::new(TaskQueueConfig::default());
        let low = task("low", &[]).with_priority(10);
        let high = task("high", &[]).with_priority(95);
        queue.enqueue_all(&[low, high]).await;
        assert_eq!(queue.next_ready().await, Some("high".to_string()));
    }

    #[tokio::test]
    async fn test_mark_completed_unblocks_dependent() {
        let queue = TaskQueue::new(TaskQueueConfig::default());
        queue.enqueue_all(&[task("a", &[]), task("b", &["a"])]).await;
        queue.mark_started("a", "w1").await;
        queue.mark_completed("a").await;
        assert_eq!(queue.get("b").await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_mark_failed_retries_then_terminates() {
        let cfg = TaskQueueConfig {
            max_retries: 1,
            ..Default::default()
        };
        let queue = TaskQueue::new(cfg);
        queue.enqueue_all(&[task("a", &[])]).await;
        queue.mark_started("a", "w1").await;
        assert!(queue.mark_failed("a", "boom").await);
        assert_eq!(queue.get("a").await.unwrap().status, TaskStatus::Queued);
        queue.mark_started("a", "w1").await;
        assert!(!queue.mark_failed("a", "boom again").await);
        assert_eq!(queue.get("a").await.unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_is_empty_after_drain() {
        let queue = TaskQueue::new(TaskQueueConfig::default());
        queue.enqueue_all(&[task("a", &[])]).await;
        assert!(!queue.is_empty().await);
        queue.mark_started("a", "w1").await;
        queue.mark_completed("a").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_unblock_dependents_on_terminal_failure() {
        let queue = TaskQueue::new(TaskQueueConfig {
            retry_failed_tasks: false,
            ..Default::default()
        });
        queue.enqueue_all(&[task("a", &[]), task("b", &["a"])]).await;
        queue.mark_started("a", "w1").await;
        assert!(!queue.mark_failed("a", "dead").await);
        queue.unblock_dependents_of("a").await;
        assert_eq!(queue.get("b").await.unwrap().status, TaskStatus::Ready);
    }
}
