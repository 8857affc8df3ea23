//! Worker pool: lifecycle, task assignment via an injected [`TaskRunner`],
//! health checks, and graceful shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::events::{EventKind, EventLog, ExecutionEvent};
use crate::task::{ExecutionPlan, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Error,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub id: String,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub start_time: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
    pub error_count: u64,
}

impl Worker {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: WorkerStatus::Idle,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            start_time: now,
            last_activity_time: now,
            error_count: 0,
        }
    }
}

/// Result of running a single task, returned by both [`TaskRunner::run`] and
/// [`WorkerPool::assign`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
}

/// User-supplied callback executing one task's business logic. Must be safe
/// to invoke from multiple concurrent activities at once.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task, plan: &ExecutionPlan) -> TaskResult;
}

struct PoolState {
    workers: Vec<Worker>,
    log: EventLog,
}

/// Owns every [`Worker`] and the injected [`TaskRunner`]. All mutators
/// serialize through one internal monitor.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    runner: Arc<dyn TaskRunner>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, runner: Arc<dyn TaskRunner>) -> Self {
        let count = if config.auto_scale { config.min_workers } else { config.worker_count };
        let mut workers = Vec::with_capacity(count);
        let mut log = EventLog::new("pool");
        for _ in 0..count {
            let worker = Worker::new();
            log.record_full(blank_event(EventKind::WorkerStarted).with_worker(worker.id.clone()));
            workers.push(worker);
        }
        Self {
            config,
            runner,
            state: Mutex::new(PoolState { workers, log }),
        }
    }

    /// The worker idle longest, by earliest `last_activity_time`. When
    /// auto-scaling is enabled and the pool has headroom, synthesizes a new
    /// worker instead of returning `None`.
    pub async fn idle_worker(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let idle = state
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Idle)
            .min_by_key(|w| w.last_activity_time)
            .map(|w| w.id.clone());
        if idle.is_some() {
            return idle;
        }
        if self.config.auto_scale && state.workers.len() < self.config.max_workers {
            let worker = Worker::new();
            let id = worker.id.clone();
            state.log.record_full(blank_event(EventKind::WorkerStarted).with_worker(id.clone()));
            state.workers.push(worker);
            return Some(id);
        }
        None
    }

    /// Assign `task` to `worker_id`, run it through the injected
    /// [`TaskRunner`], and restore the worker to `idle` on every exit path —
    /// including a panicking runner.
    pub async fn assign(&self, worker_id: &str, task: &Task, plan: &ExecutionPlan) -> TaskResult {
        {
            let mut state = self.state.lock().await;
            if let Some(worker) = state.workers.iter_mut().find(|w| w.id == worker_id) {
                worker.status = WorkerStatus::Busy;
                worker.current_task = Some(task.id.clone());
                worker.last_activity_time = Utc::now();
            }
        }

        let runner = Arc::clone(&self.runner);
        let task_owned = task.clone();
        let plan_owned = plan.clone();
        let run = tokio::spawn(async move { runner.run(&task_owned, &plan_owned).await });
        let start = Utc::now();
        let result = match run.await {
            Ok(result) => result,
            Err(join_err) => TaskResult {
                task_id: task.id.clone(),
                success: false,
                start_time: start,
                end_time: Utc::now(),
                duration_ms: 0,
                error: Some(format!("worker panicked: {join_err}")),
                files_created: Vec::new(),
                files_modified: Vec::new(),
            },
        };

        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.iter_mut().find(|w| w.id == worker_id) {
            worker.status = WorkerStatus::Idle;
            worker.current_task = None;
            worker.last_activity_time = Utc::now();
            if result.success {
                worker.tasks_completed += 1;
            } else {
                worker.tasks_failed += 1;
                worker.error_count += 1;
            }
        }
        result
    }

    /// Adds or removes workers to reach `target`, clamped to
    /// `[min_workers, max_workers]`. Only `idle` workers may be removed.
    pub async fn scale(&self, target: usize) -> usize {
        let target = target.clamp(self.config.min_workers, self.config.max_workers);
        let mut state = self.state.lock().await;
        let current = state.workers.len();
        if target > current {
            for _ in 0..(target - current) {
                let worker = Worker::new();
                state.log.record_full(blank_event(EventKind::WorkerStarted).with_worker(worker.id.clone()));
                state.workers.push(worker);
            }
        } else if target < current {
            let mut removable: Vec<String> = state
                .workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Idle)
                .map(|w| w.id.clone())
                .collect();
            removable.sort();
            removable.truncate(current - target);
            for id in removable {
                state.workers.retain(|w| w.id != id);
                state.log.record_full(blank_event(EventKind::WorkerStopped).with_worker(id));
            }
        }
        state.workers.len()
    }

    /// Refuses to terminate a `busy` worker.
    pub async fn terminate(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let busy = state.workers.iter().any(|w| w.id == id && w.status == WorkerStatus::Busy);
        if busy {
            return false;
        }
        let existed = state.workers.iter().any(|w| w.id == id);
        state.workers.retain(|w| w.id != id);
        if existed {
            state.log.record_full(blank_event(EventKind::WorkerStopped).with_worker(id));
        }
        existed
    }

    /// Flags any worker whose current task has run longer than
    /// `stuck_task_threshold_ms` as `error`, returning their ids so the
    /// caller can route their tasks through timeout handling.
    pub async fn health_check(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let threshold = chrono::Duration::milliseconds(self.config.stuck_task_threshold_ms as i64);
        let mut stuck = Vec::new();
        for worker in state.workers.iter_mut() {
            if worker.status == WorkerStatus::Busy && now - worker.last_activity_time > threshold {
                worker.status = WorkerStatus::Error;
                worker.error_count += 1;
                stuck.push(worker.id.clone());
            }
        }
        stuck.sort();
        stuck
    }

    /// Terminates every worker in lexicographic id order, refusing none
    /// (a well-behaved shutdown is only called once all tasks have drained).
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let mut ids: Vec<String> = state.workers.iter().map(|w| w.id.clone()).collect();
        ids.sort();
        for id in &ids {
            state.log.record_full(blank_event(EventKind::WorkerStopped).with_worker(id.clone()));
        }
        state.workers.clear();
    }

    pub async fn snapshot(&self) -> Vec<Worker> {
        self.state.lock().await.workers.clone()
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
        emitter: "pool",
        sequence: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRunner;

    #[async_trait]
    impl TaskRunner for EchoRunner {
        async fn run(&self, task: &Task, _plan: &ExecutionPlan) -> TaskResult {
            let now = Utc::now();
            TaskResult {
                task_id: task.id.clone(),
                success: true,
                start_time: now,
                end_time: now,
                duration_ms: 0,
                error: None,
                files_created: Vec::new(),
                files_modified: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn test_assign_returns_worker_to_idle() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), Arc::new(EchoRunner));
        let worker_id = pool.idle_worker().await.unwrap();
        let task = Task::new("a", "a", "worker");
        let plan = ExecutionPlan::new("demo", vec![]);
        let result = pool.assign(&worker_id, &task, &plan).await;
        assert!(result.success);
        let snap = pool.snapshot().await;
        let worker = snap.iter().find(|w| w.id == worker_id).unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
        assert_eq!(worker.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_scale_respects_bounds() {
        let cfg = WorkerPoolConfig {
            worker_count: 1,
            min_workers: 1,
            max_workers: 3,
            ..Default::default()
        };
        let pool = WorkerPool::new(cfg, Arc::new(EchoRunner));
        assert_eq!(pool.scale(10).await, 3);
        assert_eq!(pool.scale(0).await, 1);
    }

    #[tokio::test]
    async fn test_terminate_refuses_busy_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), Arc::new(EchoRunner));
        let worker_id = pool.idle_worker().await.unwrap();
        {
            let mut state = pool.state.lock().await;
            state.workers.iter_mut().find(|w| w.id == worker_id).unwrap().status = WorkerStatus::Busy;
        }
        assert!(!pool.terminate(&worker_id).await);
    }

    #[tokio::test]
    async fn test_shutdown_clears_all_workers() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), Arc::new(EchoRunner));
        pool.shutdown().await;
        assert!(pool.snapshot().await.is_empty());
    }
}
