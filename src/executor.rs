//! Top-level orchestrator: the single event loop coordinating every other
//! component and producing an [`ExecutionResult`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::autoscale::AutoScaler;
use crate::config::ExecutorConfig;
use crate::error::{CoreResult, ExecutionError};
use crate::estimator::{Complexity, TimeEstimator};
use crate::events::{merge_timelines, ExecutionEvent};
use crate::graph::DependencyResolver;
use crate::locks::ResourceLockManager;
use crate::metrics::{parallelism_timeline, PerformanceMetricsCollector, METRICS};
use crate::pool::{TaskRunner, WorkerPool};
use crate::queue::{PriorityBucket, QueuedTask, TaskQueue, TaskStatus};
use crate::scheduler;
use crate::task::ExecutionPlan;

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Aggregate outcome of one [`Executor::execute`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
    pub duration_ms: i64,
    pub average_parallelism: f64,
    pub peak_parallelism: usize,
    pub worker_stats: Vec<WorkerStats>,
    pub events: Vec<ExecutionEvent>,
}

/// Composes the dependency resolver, task queue, lock manager, scheduler,
/// worker pool, auto-scaler, time estimator, and progress aggregator into
/// the single `execute(plan)` entry point.
pub struct Executor {
    config: ExecutorConfig,
    lock_manager: Arc<ResourceLockManager>,
    pool: Arc<WorkerPool>,
    autoscaler: Arc<AutoScaler>,
    estimator: Arc<TimeEstimator>,
    metrics: Arc<PerformanceMetricsCollector>,
    peak_parallelism: AtomicUsize,
    parallelism_samples: Mutex<Vec<i64>>,
    in_flight: Arc<AtomicI64>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, runner: Arc<dyn TaskRunner>) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool.clone(), runner));
        let autoscaler = Arc::new(AutoScaler::new(config.autoscale.clone()));
        Self {
            config,
            lock_manager: Arc::new(ResourceLockManager::new()),
            pool,
            autoscaler,
            estimator: Arc::new(TimeEstimator::default()),
            metrics: Arc::new(PerformanceMetricsCollector::new()),
            peak_parallelism: AtomicUsize::new(0),
            parallelism_samples: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn lock_manager(&self) -> Arc<ResourceLockManager> {
        Arc::clone(&self.lock_manager)
    }

    /// Drives `plan` to completion. The only error this can return is a
    /// cyclic dependency declaration — once the graph builds, every other
    /// failure is captured per-task in the returned [`ExecutionResult`].
    pub async fn execute(&self, plan: ExecutionPlan) -> CoreResult<ExecutionResult> {
        let tasks: Vec<_> = plan.tasks().into_iter().cloned().collect();
        let resolver = Arc::new(DependencyResolver::build(&tasks).map_err(ExecutionError::from)?);
        let queue = Arc::new(TaskQueue::new(self.config.queue.clone()));
        queue.enqueue_all(&tasks).await;
        for _ in &tasks {
            METRICS.inc_tasks_enqueued();
        }

        let started_at = Utc::now();
        let plan = Arc::new(plan);
        let mut handles = Vec::new();

        loop {
            if queue.is_empty().await && self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }

            self.reap_finished(&mut handles).await;

            if self.in_flight.load(Ordering::SeqCst) >= self.config.queue.max_concurrent_tasks as i64 {
                tokio::time::sleep(IDLE_POLL).await;
                self.sweep_timeouts(&queue, &resolver).await;
                continue;
            }

            let worker_id = match self.pool.idle_worker().await {
                Some(w) => w,
                None => {
                    tokio::time::sleep(IDLE_POLL).await;
                    self.sweep_timeouts(&queue, &resolver).await;
                    self.maybe_autoscale(&queue).await;
                    continue;
                }
            };
            let task_id = match self.pick_task(&queue, &worker_id).await {
                Some(t) => t,
                None => {
                    tokio::time::sleep(IDLE_POLL).await;
                    self.sweep_timeouts(&queue, &resolver).await;
                    continue;
                }
            };

            queue.mark_started(&task_id, &worker_id).await;
            resolver.mark_started(&task_id).await;
            let snapshot_tasks = queue.snapshot().await;
            self.lock_manager.snapshot(snapshot_tasks).await;

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            self.sample_parallelism().await;

            let pool = Arc::clone(&self.pool);
            let queue_clone = Arc::clone(&queue);
            let resolver_clone = Arc::clone(&resolver);
            let estimator = Arc::clone(&self.estimator);
            let metrics = Arc::clone(&self.metrics);
            let plan_clone = Arc::clone(&plan);
            let task = tasks.iter().find(|t| t.id == task_id).unwrap().clone();
            let worker_id_clone = worker_id.clone();
            let in_flight = Arc::clone(&self.in_flight);

            let handle = tokio::spawn(async move {
                metrics.record_busy_start(&worker_id_clone).await;
                let result = pool.assign(&worker_id_clone, &task, &plan_clone).await;
                metrics.record_busy_end(&worker_id_clone).await;
                if result.success {
                    queue_clone.mark_completed(&task_id).await;
                    resolver_clone.mark_completed(&task_id).await;
                    let bucket = PriorityBucket::derive(&task);
                    let complexity = Complexity::infer(task.dependencies.len(), bucket);
                    estimator.record(&task.agent, complexity, result.duration_ms.max(0) as u64).await;
                    METRICS.inc_tasks_completed();
                } else {
                    let reason = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
                    let will_retry = queue_clone.mark_failed(&task_id, &reason).await;
                    if !will_retry {
                        resolver_clone.mark_failed(&task_id, true).await;
                        queue_clone.unblock_dependents_of(&task_id).await;
                        METRICS.inc_tasks_failed();
                    }
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }

        let snapshot = queue.snapshot().await;
        let completed = snapshot.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let failed = snapshot.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let end = Utc::now();
        let duration_ms = (end - started_at).num_milliseconds();

        let worker_snapshot = self.pool.snapshot().await;
        let worker_stats: Vec<WorkerStats> = worker_snapshot
            .iter()
            .map(|w| WorkerStats {
                worker_id: w.id.clone(),
                tasks_completed: w.tasks_completed,
                tasks_failed: w.tasks_failed,
            })
            .collect();

        let samples = self.parallelism_samples.lock().await;
        let average_parallelism = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<i64>() as f64 / samples.len() as f64
        };
        drop(samples);

        let queue_events = queue.events().await;
        let pool_events = self.pool.events().await;
        let events = merge_timelines(&[queue_events, pool_events]);
        let _ = parallelism_timeline(&events);

        self.pool.shutdown().await;

        Ok(ExecutionResult {
            success: failed == 0,
            completed_tasks: completed,
            failed_tasks: failed,
            total_tasks: snapshot.len(),
            duration_ms,
            average_parallelism,
            peak_parallelism: self.peak_parallelism.load(Ordering::SeqCst),
            worker_stats,
            events,
        })
    }

    async fn reap_finished(&self, handles: &mut Vec<tokio::task::JoinHandle<()>>) {
        handles.retain(|h| !h.is_finished());
    }

    async fn sample_parallelism(&self) {
        let current = self.in_flight.load(Ordering::SeqCst);
        self.peak_parallelism.fetch_max(current.max(0) as usize, Ordering::SeqCst);
        self.parallelism_samples.lock().await.push(current);
    }

    /// Gathers the ready set and hands it to `scheduler::select` alongside
    /// `worker_id`'s current view of the pool, per `self.config.strategy`.
    async fn pick_task(&self, queue: &TaskQueue, worker_id: &str) -> Option<String> {
        let ready = queue.ready_candidates().await;
        if ready.is_empty() {
            return None;
        }
        let all_workers = self.pool.snapshot().await;
        let worker = all_workers.iter().find(|w| w.id == worker_id)?.clone();

        let mut history_cache: HashMap<String, Vec<u64>> = HashMap::new();
        for candidate in &ready {
            if let std::collections::hash_map::Entry::Vacant(entry) = history_cache.entry(candidate.task.agent.clone()) {
                entry.insert(self.estimator.history_for_agent(&candidate.task.agent).await);
            }
        }

        let ready_refs: Vec<&QueuedTask> = ready.iter().collect();
        scheduler::select(self.config.strategy, &ready_refs, &worker, &all_workers, |agent| {
            history_cache.get(agent).cloned().unwrap_or_default()
        })
        .map(|t| t.task.id.clone())
    }

    async fn sweep_timeouts(&self, queue: &TaskQueue, resolver: &DependencyResolver) {
        let timed_out = queue.check_timeouts().await;
        for id in timed_out {
            queue.mark_failed(&id, "timeout").await;
            resolver.mark_failed(&id, true).await;
            queue.unblock_dependents_of(&id).await;
        }
    }

    async fn maybe_autoscale(&self, queue: &TaskQueue) {
        if !self.config.pool.auto_scale {
            return;
        }
        let workers = self.pool.snapshot().await;
        let queued_count = queue
            .snapshot()
            .await
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Ready))
            .count();
        let delta = self.autoscaler.evaluate(&workers, queued_count).await;
        if delta != 0 {
            let target = (workers.len() as i64 + delta).max(1) as usize;
            self.pool.scale(target).await;
        }
    }
}

/// Bucket counts by priority bucket, used by callers building their own
/// progress snapshots on top of a running executor.
pub fn bucket_counts(statuses: &[(PriorityBucket, TaskStatus)]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for (bucket, _) in statuses {
        let key = match bucket {
            PriorityBucket::Critical => "critical",
            PriorityBucket::High => "high",
            PriorityBucket::Normal => "normal",
            PriorityBucket::Low => "low",
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TaskResult;
    use crate::task::Task;
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl TaskRunner for AlwaysSucceeds {
        async fn run(&self, task: &Task, _plan: &ExecutionPlan) -> TaskResult {
            let now = Utc::now();
            TaskResult {
                task_id: task.id.clone(),
                success: true,
                start_time: now,
                end_time: now,
                duration_ms: 1,
                error: None,
                files_created: Vec::new(),
                files_modified: Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn test_linear_chain_completes_in_order() {
        let tasks = vec![
            Task::new("a", "a", "worker"),
            Task::new("b", "b", "worker").with_dependencies(["a".to_string()].into_iter().collect()),
            Task::new("c", "c", "worker").with_dependencies(["b".to_string()].into_iter().collect()),
        ];
        let plan = ExecutionPlan::new("chain", tasks);
        let executor = Executor::new(ExecutorConfig::default(), Arc::new(AlwaysSucceeds));
        let result = executor.execute(plan).await.unwrap();
        assert!(result.success);
        assert_eq!(result.completed_tasks, 3);
        assert_eq!(result.failed_tasks, 0);
    }

    #[tokio::test]
    async fn test_cycle_is_fatal_before_any_work() {
        let tasks = vec![
            Task::new("a", "a", "worker").with_dependencies(["b".to_string()].into_iter().collect()),
            Task::new("b", "b", "worker").with_dependencies(["a".to_string()].into_iter().collect()),
        ];
        let plan = ExecutionPlan::new("cycle", tasks);
        let executor = Executor::new(ExecutorConfig::default(), Arc::new(AlwaysSucceeds));
        let err = executor.execute(plan).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Cycle(_)));
    }
}
