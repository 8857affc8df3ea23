//! Auto-scaler: evaluates queue depth and worker idle time to suggest pool
//! resizing, gated by a cooldown window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::AutoScalingConfig;
use crate::pool::{Worker, WorkerStatus};

struct ScalerState {
    last_action: Option<DateTime<Utc>>,
    /// First-observed idle timestamp per worker id; cleared when a worker
    /// transitions back to busy.
    idle_since: HashMap<String, DateTime<Utc>>,
}

pub struct AutoScaler {
    config: AutoScalingConfig,
    state: Mutex<ScalerState>,
}

impl AutoScaler {
    pub fn new(config: AutoScalingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ScalerState {
                last_action: None,
                idle_since: HashMap::new(),
            }),
        }
    }

    /// Suggests a worker-count delta. Positive means scale up, negative
    /// scale down, zero means no action this round.
    pub async fn evaluate(&self, workers: &[Worker], queued_count: usize) -> i64 {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        for worker in workers {
            if worker.status == WorkerStatus::Busy {
                state.idle_since.remove(&worker.id);
            } else {
                state.idle_since.entry(worker.id.clone()).or_insert(now);
            }
        }
        state.idle_since.retain(|id, _| workers.iter().any(|w| w.id == *id));

        if let Some(last) = state.last_action {
            let cooldown = chrono::Duration::milliseconds(self.config.cooldown_ms as i64);
            if now - last < cooldown {
                return 0;
            }
        }

        let current = workers.len();
        let busy = workers.iter().filter(|w| w.status == WorkerStatus::Busy).count();

        if queued_count >= self.config.scale_up_threshold && current < self.config.max_workers {
            let suggested = (queued_count as f64 / busy.max(1) as f64).ceil() as i64;
            let headroom = (self.config.max_workers - current) as i64;
            let delta = suggested.min(headroom).max(1);
            state.last_action = Some(now);
            return delta;
        }

        if busy == current && current > 0 && queued_count > 0 && current < self.config.max_workers {
            state.last_action = Some(now);
            return 1;
        }

        let threshold = chrono::Duration::milliseconds(self.config.scale_down_threshold_ms as i64);
        let idle_long_enough: Vec<&String> = state
            .idle_since
            .iter()
            .filter(|(_, since)| now - **since >= threshold)
            .map(|(id, _)| id)
            .collect();
        if !idle_long_enough.is_empty() && current > self.config.min_workers {
            let removable = idle_long_enough.len().min(current - self.config.min_workers);
            if removable > 0 {
                state.last_action = Some(now);
                return -(removable as i64);
            }
        }

        0
    }

    /// Minimizes `seq_time + ceil(parallel_tasks / workers) * avg`, returning
    /// the worker count that achieves it within `[1, max_workers]`.
    pub fn optimal_worker_count(&self, parallel_tasks: usize, seq_tasks: usize, avg_duration_ms: u64) -> usize {
        if parallel_tasks == 0 {
            return self.config.min_workers.max(1);
        }
        let seq_time = seq_tasks as u64 * avg_duration_ms;
        let mut best_workers = 1usize;
        let mut best_time = u64::MAX;
        for workers in 1..=self.config.max_workers {
            let parallel_time = (parallel_tasks as u64).div_ceil(workers as u64) * avg_duration_ms;
            let total = seq_time + parallel_time;
            if total < best_time {
                best_time = total;
                best_workers = workers;
            }
        }
        best_workers.clamp(self.config.min_workers.max(1), self.config.max_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, status: WorkerStatus) -> Worker {
        Worker {
            id: id.to_string(),
            status,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            start_time: Utc::now(),
            last_activity_time: Utc::now(),
            error_count: 0,
        }
    }

    #[tokio::test]
    async fn test_scale_up_when_queue_deep() {
        let cfg = AutoScalingConfig {
            scale_up_threshold: 5,
            max_workers: 10,
            cooldown_ms: 0,
            ..Default::default()
        };
        let scaler = AutoScaler::new(cfg);
        let workers = vec![worker("w1", WorkerStatus::Busy)];
        let delta = scaler.evaluate(&workers, 10).await;
        assert!(delta > 0);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_action() {
        let cfg = AutoScalingConfig {
            scale_up_threshold: 1,
            cooldown_ms: 60_000,
            ..Default::default()
        };
        let scaler = AutoScaler::new(cfg);
        let workers = vec![worker("w1", WorkerStatus::Busy)];
        let first = scaler.evaluate(&workers, 5).await;
        let second = scaler.evaluate(&workers, 5).await;
        assert!(first > 0);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_scale_down_requires_sustained_idle() {
        let cfg = AutoScalingConfig {
            min_workers: 1,
            scale_down_threshold_ms: 0,
            cooldown_ms: 0,
            ..Default::default()
        };
        let scaler = AutoScaler::new(cfg);
        let workers = vec![worker("w1", WorkerStatus::Idle), worker("w2", WorkerStatus::Idle)];
        scaler.evaluate(&workers, 0).await;
        let delta = scaler.evaluate(&workers, 0).await;
        assert!(delta < 0);
    }

    #[test]
    fn test_optimal_worker_count_caps_at_max() {
        let cfg = AutoScalingConfig {
            max_workers: 4,
            ..Default::default()
        };
        let scaler = AutoScaler::new(cfg);
        let workers = scaler.optimal_worker_count(20, 0, 1000);
        assert!(workers <= 4);
    }
}
