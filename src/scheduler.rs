//! Scheduler: given the ready set and an idle worker, selects the next task
//! to run by one of six strategies.

use serde::{Deserialize, Serialize};

use crate::pool::Worker;
use crate::queue::QueuedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStrategy {
    Fifo,
    Priority,
    ShortestJobFirst,
    CriticalPath,
    RoundRobin,
    WorkloadBalanced,
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::WorkloadBalanced
    }
}

/// Weighted-moving-average estimate over an agent's past durations,
/// falling back to `estimated_minutes` when there's no history yet.
pub fn estimate_duration_ms(task: &QueuedTask, history: &[u64]) -> u64 {
    if history.is_empty() {
        return task
            .task
            .estimated_minutes
            .map(|m| (m * 60_000.0) as u64)
            .unwrap_or(60_000);
    }
    let mut weighted_sum: f64 = 0.0;
    let mut weight_total: f64 = 0.0;
    for (i, duration) in history.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += weight * (*duration as f64);
        weight_total += weight;
    }
    (weighted_sum / weight_total) as u64
}

fn tie_break<'a>(tasks: &[&'a QueuedTask]) -> Option<&'a QueuedTask> {
    tasks
        .iter()
        .min_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.task.id.cmp(&b.task.id)))
        .copied()
}

/// Select the next task to run for `worker` out of `ready_tasks`, given a
/// view of `all_workers` (needed by ROUND_ROBIN and WORKLOAD_BALANCED) and a
/// per-agent duration-history lookup used by SHORTEST_JOB_FIRST.
pub fn select<'a>(
    strategy: SchedulingStrategy,
    ready_tasks: &[&'a QueuedTask],
    worker: &Worker,
    all_workers: &[Worker],
    history_for_agent: impl Fn(&str) -> Vec<u64>,
) -> Option<&'a QueuedTask> {
    if ready_tasks.is_empty() {
        return None;
    }
    match strategy {
        SchedulingStrategy::Fifo => tie_break(ready_tasks),
        SchedulingStrategy::Priority => {
            let max_weight = ready_tasks.iter().map(|t| t.priority_bucket.weight()).max().unwrap();
            let top: Vec<&&QueuedTask> = ready_tasks
                .iter()
                .filter(|t| t.priority_bucket.weight() == max_weight)
                .collect();
            tie_break(&top.into_iter().copied().collect::<Vec<_>>())
        }
        SchedulingStrategy::ShortestJobFirst => {
            shortest(ready_tasks, &history_for_agent)
        }
        SchedulingStrategy::CriticalPath => critical_path_pick(ready_tasks, &history_for_agent),
        SchedulingStrategy::RoundRobin => {
            let idx = all_workers.iter().position(|w| w.id == worker.id).unwrap_or(0);
            let pick = idx % ready_tasks.len();
            Some(ready_tasks[pick])
        }
        SchedulingStrategy::WorkloadBalanced => {
            workload_balanced_pick(ready_tasks, worker, all_workers, &history_for_agent)
        }
    }
}

fn shortest<'a>(
    ready_tasks: &[&'a QueuedTask],
    history_for_agent: &impl Fn(&str) -> Vec<u64>,
) -> Option<&'a QueuedTask> {
    ready_tasks
        .iter()
        .min_by_key(|t| estimate_duration_ms(t, &history_for_agent(&t.task.agent)))
        .copied()
}

fn longest<'a>(
    ready_tasks: &[&'a QueuedTask],
    history_for_agent: &impl Fn(&str) -> Vec<u64>,
) -> Option<&'a QueuedTask> {
    ready_tasks
        .iter()
        .max_by_key(|t| estimate_duration_ms(t, &history_for_agent(&t.task.agent)))
        .copied()
}

fn critical_path_pick<'a>(
    ready_tasks: &[&'a QueuedTask],
    history_for_agent: &impl Fn(&str) -> Vec<u64>,
) -> Option<&'a QueuedTask> {
    let max_dependents = ready_tasks.iter().map(|t| t.dependents.len()).max().unwrap();
    let top: Vec<&&QueuedTask> = ready_tasks
        .iter()
        .filter(|t| t.dependents.len() == max_dependents)
        .collect();
    let top: Vec<&QueuedTask> = top.into_iter().copied().collect();
    longest(&top, history_for_agent)
}

fn workload_balanced_pick<'a>(
    ready_tasks: &[&'a QueuedTask],
    worker: &Worker,
    all_workers: &[Worker],
    history_for_agent: &impl Fn(&str) -> Vec<u64>,
) -> Option<&'a QueuedTask> {
    if all_workers.is_empty() {
        return tie_break(ready_tasks);
    }
    let avg_load: f64 = all_workers
        .iter()
        .map(|w| (w.tasks_completed + w.tasks_failed) as f64)
        .sum::<f64>()
        / all_workers.len() as f64;
    let load = (worker.tasks_completed + worker.tasks_failed) as f64;
    if load < 0.8 * avg_load {
        longest(ready_tasks, history_for_agent)
    } else if load > 1.2 * avg_load {
        shortest(ready_tasks, history_for_agent)
    } else {
        let max_weight = ready_tasks.iter().map(|t| t.priority_bucket.weight()).max().unwrap();
        let top: Vec<&QueuedTask> = ready_tasks
            .iter()
            .filter(|t| t.priority_bucket.weight() == max_weight)
            .copied()
            .collect();
        tie_break(&top)
    }
}

/// Auto-select a strategy from aggregate properties of `tasks`.
pub fn recommend_strategy(tasks: &[QueuedTask]) -> SchedulingStrategy {
    if tasks.is_empty() {
        return SchedulingStrategy::WorkloadBalanced;
    }
    let total = tasks.len() as f64;
    let with_deps = tasks.iter().filter(|t| !t.task.dependencies.is_empty()).count() as f64;
    if with_deps / total > 0.5 {
        return SchedulingStrategy::CriticalPath;
    }
    let high_priority = tasks
        .iter()
        .filter(|t| matches!(t.priority_bucket, crate::queue::PriorityBucket::Critical | crate::queue::PriorityBucket::High))
        .count() as f64;
    if high_priority / total > 0.3 {
        return SchedulingStrategy::Priority;
    }
    let durations: Vec<f64> = tasks
        .iter()
        .map(|t| t.task.estimated_minutes.unwrap_or(1.0))
        .collect();
    let mean = durations.iter().sum::<f64>() / total;
    let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / total;
    let std_dev = variance.sqrt();
    if mean > 0.0 && std_dev > 0.5 * mean {
        return SchedulingStrategy::ShortestJobFirst;
    }
    SchedulingStrategy::WorkloadBalanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerStatus;
    use crate::task::Task;

    fn queued(id: &str, priority: u8) -> QueuedTask {
        let task = Task::new(id, id, "worker").with_priority(priority);
        QueuedTask {
            priority_bucket: crate::queue::PriorityBucket::derive(&task),
            status: crate::queue::TaskStatus::Queued,
            queued_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            retry_count: 0,
            dependencies: Default::default(),
            dependents: Default::default(),
            task,
        }
    }

    fn worker(id: &str) -> Worker {
        Worker {
            id: id.to_string(),
            status: WorkerStatus::Idle,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            start_time: chrono::Utc::now(),
            last_activity_time: chrono::Utc::now(),
            error_count: 0,
        }
    }

    #[test]
    fn test_priority_strategy_picks_max_bucket() {
        let low = queued("low", 10);
        let high = queued("high", 95);
        let refs = vec![&low, &high];
        let w = worker("w1");
        let picked = select(SchedulingStrategy::Priority, &refs, &w, &[], |_| vec![]);
        assert_eq!(picked.unwrap().task.id, "high");
    }

    #[test]
    fn test_fifo_picks_earliest_queued_at() {
        let mut first = queued("first", 50);
        first.queued_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let second = queued("second", 50);
        let refs = vec![&second, &first];
        let w = worker("w1");
        let picked = select(SchedulingStrategy::Fifo, &refs, &w, &[], |_| vec![]);
        assert_eq!(picked.unwrap().task.id, "first");
    }

    #[test]
    fn test_recommend_strategy_detects_critical_path_heavy_plan() {
        let mut a = queued("a", 50);
        let mut b = queued("b", 50);
        b.task.dependencies.insert("a".to_string());
        a.task.dependencies.insert("placeholder".to_string());
        let strat = recommend_strategy(&[a, b]);
        assert_eq!(strat, SchedulingStrategy::CriticalPath);
    }
}
