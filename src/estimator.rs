//! Time estimator: weighted moving average and standard deviation per
//! (agent, complexity) bucket, plus parallel-time estimation for the whole
//! remaining queue.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::queue::{PriorityBucket, QueuedTask};

const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// `complex` on more than 3 dependencies or a `critical` bucket;
    /// `simple` only for no dependencies *and* a `low` bucket; everything
    /// else is `moderate`.
    pub fn infer(dependency_count: usize, priority_bucket: PriorityBucket) -> Self {
        if dependency_count > 3 || priority_bucket == PriorityBucket::Critical {
            Complexity::Complex
        } else if dependency_count == 0 && priority_bucket == PriorityBucket::Low {
            Complexity::Simple
        } else {
            Complexity::Moderate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DurationEstimate {
    pub estimated_ms: u64,
    pub low_ms: u64,
    pub high_ms: u64,
    pub confidence: Confidence,
}

struct EstimatorState {
    histories: HashMap<(String, Complexity), VecDeque<u64>>,
}

/// Owns a fixed-capacity ring buffer of observed durations per
/// `(agent, complexity)` key.
pub struct TimeEstimator {
    capacity: usize,
    state: Mutex<EstimatorState>,
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TimeEstimator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(EstimatorState {
                histories: HashMap::new(),
            }),
        }
    }

    pub async fn record(&self, agent: &str, complexity: Complexity, duration_ms: u64) {
        let mut state = self.state.lock().await;
        let ring = state.histories.entry((agent.to_string(), complexity)).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(duration_ms);
    }

    /// Weighted moving average (more recent samples weighted higher) plus or
    /// minus one standard deviation, falling back to the task's
    /// `estimated_minutes` when no history exists yet.
    pub async fn estimate(&self, task: &QueuedTask) -> DurationEstimate {
        let complexity = Complexity::infer(task.task.dependencies.len(), task.priority_bucket);
        let state = self.state.lock().await;
        let history = state
            .histories
            .get(&(task.task.agent.clone(), complexity))
            .cloned()
            .unwrap_or_default();

        if history.is_empty() {
            let fallback = task
                .task
                .estimated_minutes
                .map(|m| (m * 60_000.0) as u64)
                .unwrap_or(60_000);
            return DurationEstimate {
                estimated_ms: fallback,
                low_ms: fallback,
                high_ms: fallback,
                confidence: Confidence::Low,
            };
        }

        let samples: Vec<f64> = history.iter().map(|d| *d as f64).collect();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            let weight = (i + 1) as f64;
            weighted_sum += weight * sample;
            weight_total += weight;
        }
        let mean = weighted_sum / weight_total;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        let std_dev = variance.sqrt();

        let confidence = if samples.len() < 5 {
            Confidence::Low
        } else if samples.len() < 15 {
            Confidence::Medium
        } else {
            Confidence::High
        };

        DurationEstimate {
            estimated_ms: mean as u64,
            low_ms: (mean - std_dev).max(0.0) as u64,
            high_ms: (mean + std_dev) as u64,
            confidence,
        }
    }

    /// All recorded durations for `agent`, across every complexity bucket.
    /// Used by `scheduler::select` (SHORTEST_JOB_FIRST / CRITICAL_PATH),
    /// which needs a plain per-agent sample list rather than a
    /// complexity-keyed one.
    pub async fn history_for_agent(&self, agent: &str) -> Vec<u64> {
        let state = self.state.lock().await;
        state
            .histories
            .iter()
            .filter(|((a, _), _)| a == agent)
            .flat_map(|(_, ring)| ring.iter().copied())
            .collect()
    }

    /// Estimated wall time to drain `queued` and `running` given
    /// `active_workers`: `max(critical_path, total_work / workers)`.
    pub async fn estimate_time_remaining(
        &self,
        queued: &[QueuedTask],
        running: &[QueuedTask],
        active_workers: usize,
    ) -> u64 {
        let mut total_work_ms: u64 = 0;
        let mut estimates: HashMap<String, u64> = HashMap::new();
        for task in queued.iter().chain(running.iter()) {
            let est = self.estimate(task).await;
            total_work_ms += est.estimated_ms;
            estimates.insert(task.task.id.clone(), est.estimated_ms);
        }
        if active_workers == 0 {
            return total_work_ms;
        }

        let critical_path_ms = longest_chain_ms(queued, running, &estimates);
        let parallel_time = total_work_ms / active_workers as u64;
        critical_path_ms.max(parallel_time)
    }
}

/// Memoized longest-path (by summed estimated duration) over the subset of
/// tasks passed in, following each task's live dependency set.
fn longest_chain_ms(queued: &[QueuedTask], running: &[QueuedTask], estimates: &HashMap<String, u64>) -> u64 {
    let all: HashMap<&str, &QueuedTask> = queued
        .iter()
        .chain(running.iter())
        .map(|t| (t.task.id.as_str(), t))
        .collect();

    let mut memo: HashMap<String, u64> = HashMap::new();
    let mut ids: Vec<&str> = all.keys().copied().collect();
    ids.sort();

    fn walk<'a>(
        id: &'a str,
        all: &HashMap<&'a str, &'a QueuedTask>,
        estimates: &HashMap<String, u64>,
        memo: &mut HashMap<String, u64>,
    ) -> u64 {
        if let Some(cached) = memo.get(id) {
            return *cached;
        }
        let own = estimates.get(id).copied().unwrap_or(0);
        let task = match all.get(id) {
            Some(t) => t,
            None => return own,
        };
        let best_dependent = task
            .dependents
            .iter()
            .filter(|d| all.contains_key(d.as_str()))
            .map(|d| walk(d, all, estimates, memo))
            .max()
            .unwrap_or(0);
        let total = own + best_dependent;
        memo.insert(id.to_string(), total);
        total
    }

    ids.iter().map(|id| walk(id, &all, estimates, &mut memo)).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn queued(id: &str, agent: &str) -> QueuedTask {
        let task = Task::new(id, id, agent);
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

    #[tokio::test]
    async fn test_estimate_falls_back_without_history() {
        let estimator = TimeEstimator::default();
        let mut task = queued("a", "worker");
        task.task.estimated_minutes = Some(2.0);
        let est = estimator.estimate(&task).await;
        assert_eq!(est.estimated_ms, 120_000);
        assert_eq!(est.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_record_and_estimate_uses_history() {
        let estimator = TimeEstimator::default();
        for d in [1000, 2000, 3000, 4000, 5000] {
            estimator.record("worker", Complexity::Simple, d).await;
        }
        let mut task = queued("a", "worker");
        task.task.priority = 10;
        task.priority_bucket = crate::queue::PriorityBucket::derive(&task.task);
        let est = estimator.estimate(&task).await;
        assert!(est.estimated_ms > 0);
        assert_eq!(est.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_ring_buffer_respects_capacity() {
        let estimator = TimeEstimator::new(3);
        for d in [1, 2, 3, 4, 5] {
            estimator.record("worker", Complexity::Simple, d).await;
        }
        let state = estimator.state.lock().await;
        let ring = state.histories.get(&("worker".to_string(), Complexity::Simple)).unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.front().copied(), Some(3));
    }

    #[test]
    fn test_complexity_inference() {
        assert_eq!(Complexity::infer(0, PriorityBucket::Low), Complexity::Simple);
        assert_eq!(Complexity::infer(4, PriorityBucket::Low), Complexity::Complex);
        assert_eq!(Complexity::infer(1, PriorityBucket::Critical), Complexity::Complex);
        assert_eq!(Complexity::infer(2, PriorityBucket::Normal), Complexity::Moderate);
        // A 0-dependency task still falls through to moderate unless its
        // priority bucket is also low.
        assert_eq!(Complexity::infer(0, PriorityBucket::High), Complexity::Moderate);
    }
}
