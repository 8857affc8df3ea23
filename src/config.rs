//! Construction-time configuration for every component. Every defaulted
//! option named in the external interface is a field here; nothing reads
//! process-wide state.

use serde::{Deserialize, Serialize};

/// Configuration for the [`crate::queue::TaskQueue`] (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    pub max_concurrent_tasks: usize,
    pub priority_scheduling: bool,
    pub retry_failed_tasks: bool,
    pub max_retries: u32,
    pub task_timeout_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            priority_scheduling: true,
            retry_failed_tasks: true,
            max_retries: 2,
            task_timeout_ms: 300_000,
        }
    }
}

/// Configuration for the [`crate::pool::WorkerPool`] (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub auto_scale: bool,
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout_ms: u64,
    /// Promoted from a hard-coded 30-minute constant: a busy worker whose
    /// task has run longer than this is flagged `error` by `health_check`.
    pub stuck_task_threshold_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            auto_scale: false,
            min_workers: 1,
            max_workers: 10,
            idle_timeout_ms: 300_000,
            stuck_task_threshold_ms: 30 * 60 * 1000,
        }
    }
}

/// Configuration for the [`crate::autoscale::AutoScaler`] (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScalingConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_up_threshold: usize,
    pub scale_down_threshold_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            scale_up_threshold: 5,
            scale_down_threshold_ms: 30_000,
            cooldown_ms: 10_000,
        }
    }
}

/// Top-level bundle handed to [`crate::executor::Executor::new`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub queue: TaskQueueConfig,
    pub pool: WorkerPoolConfig,
    pub autoscale: AutoScalingConfig,
    pub strategy: crate::scheduler::SchedulingStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_queue_config_defaults() {
        let cfg = TaskQueueConfig::default();
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.task_timeout_ms, 300_000);
    }

    #[test]
    fn test_worker_pool_config_defaults() {
        let cfg = WorkerPoolConfig::default();
        assert_eq!(cfg.worker_count, 3);
        assert!(!cfg.auto_scale);
        assert_eq!(cfg.stuck_task_threshold_ms, 1_800_000);
    }

    #[test]
    fn test_autoscaling_config_defaults() {
        let cfg = AutoScalingConfig::default();
        assert_eq!(cfg.scale_up_threshold, 5);
        assert_eq!(cfg.cooldown_ms, 10_000);
    }
}
