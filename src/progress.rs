//! Progress aggregator: derives throughput, ETA, and parallelism metrics
//! from queue and worker state, and renders a human-readable report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::average_task_duration_ms;
use crate::queue::{QueuedTask, TaskStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub remaining: usize,
    pub throughput_per_minute: f64,
    pub average_task_duration_ms: f64,
    /// Milliseconds, or `f64::INFINITY` when there are no active workers.
    pub estimated_time_remaining_ms: f64,
    pub worker_utilization: f64,
    pub parallelism_efficiency: f64,
}

pub struct ProgressAggregator;

impl ProgressAggregator {
    pub fn compute(
        tasks: &[QueuedTask],
        active_workers: usize,
        worker_count: usize,
        worker_utilization: f64,
        started_at: DateTime<Utc>,
    ) -> ProgressMetrics {
        let now = Utc::now();
        let elapsed_ms = (now - started_at).num_milliseconds().max(1) as f64;
        let elapsed_minutes = elapsed_ms / 60_000.0;

        let completed_tasks: Vec<QueuedTask> =
            tasks.iter().filter(|t| t.status == TaskStatus::Completed).cloned().collect();
        let completed = completed_tasks.len();
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let running = tasks.iter().filter(|t| t.status == TaskStatus::Running).count();
        let remaining = tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Queued | TaskStatus::Ready | TaskStatus::Blocked | TaskStatus::Running
                )
            })
            .count();

        let throughput_per_minute = if elapsed_minutes > 0.0 {
            completed as f64 / elapsed_minutes
        } else {
            0.0
        };
        let avg_duration = average_task_duration_ms(&completed_tasks);

        let estimated_time_remaining_ms = if remaining == 0 {
            0.0
        } else if active_workers == 0 {
            f64::INFINITY
        } else {
            (remaining as f64) * avg_duration / (active_workers as f64)
        };

        let parallelism_efficiency = if worker_count == 0 || elapsed_ms <= 0.0 {
            0.0
        } else {
            ((completed as f64 * avg_duration / elapsed_ms) / worker_count as f64 * 100.0).clamp(0.0, 100.0)
        };

        ProgressMetrics {
            completed,
            failed,
            running,
            remaining,
            throughput_per_minute,
            average_task_duration_ms: avg_duration,
            estimated_time_remaining_ms,
            worker_utilization,
            parallelism_efficiency,
        }
    }

    /// Plain-text progress report, built the way the corpus renders
    /// artifacts: `String` + `push_str`, no templating engine.
    pub fn render_report(project_name: &str, metrics: &ProgressMetrics, peak_parallelism: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Execution Report: {project_name}\n\n"));
        out.push_str(&format!("- Completed: {}\n", metrics.completed));
        out.push_str(&format!("- Failed: {}\n", metrics.failed));
        out.push_str(&format!("- Running: {}\n", metrics.running));
        out.push_str(&format!("- Remaining: {}\n", metrics.remaining));
        out.push_str(&format!("- Throughput: {:.2} tasks/min\n", metrics.throughput_per_minute));
        out.push_str(&format!("- Average task duration: {:.0} ms\n", metrics.average_task_duration_ms));
        if metrics.estimated_time_remaining_ms.is_infinite() {
            out.push_str("- Estimated time remaining: unknown (no active workers)\n");
        } else {
            out.push_str(&format!("- Estimated time remaining: {:.0} ms\n", metrics.estimated_time_remaining_ms));
        }
        out.push_str(&format!("- Worker utilization: {:.1}%\n", metrics.worker_utilization * 100.0));
        out.push_str(&format!("- Parallelism efficiency: {:.1}%\n", metrics.parallelism_efficiency));
        out.push_str(&format!("- Peak parallelism: {peak_parallelism}\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn completed_task(id: &str, started_secs_ago: i64, duration_secs: i64) -> QueuedTask {
        let now = Utc::now();
        QueuedTask {
            priority_bucket: crate::queue::PriorityBucket::Normal,
            status: TaskStatus::Completed,
            queued_at: now - chrono::Duration::seconds(started_secs_ago),
            started_at: Some(now - chrono::Duration::seconds(started_secs_ago)),
            completed_at: Some(now - chrono::Duration::seconds(started_secs_ago - duration_secs)),
            worker_id: Some("w1".to_string()),
            retry_count: 0,
            dependencies: Default::default(),
            dependents: Default::default(),
            task: Task::new(id, id, "worker"),
        }
    }

    #[test]
    fn test_compute_zero_remaining_has_zero_eta() {
        let tasks = vec![completed_task("a", 60, 10)];
        let metrics = ProgressAggregator::compute(&tasks, 1, 1, 0.5, Utc::now() - chrono::Duration::seconds(60));
        assert_eq!(metrics.remaining, 0);
        assert_eq!(metrics.estimated_time_remaining_ms, 0.0);
    }

    #[test]
    fn test_render_report_contains_project_name() {
        let tasks = vec![completed_task("a", 60, 10)];
        let metrics = ProgressAggregator::compute(&tasks, 1, 1, 0.5, Utc::now() - chrono::Duration::seconds(60));
        let report = ProgressAggregator::render_report("demo", &metrics, 3);
        assert!(report.contains("demo"));
        assert!(report.contains("Peak parallelism: 3"));
    }
}
