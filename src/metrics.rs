//! Performance metrics: per-run wall-clock queue latency, worker
//! utilization, and speedup efficiency (C9), plus a lightweight ambient
//! counter set for cheap cross-cutting observability.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::events::{EventKind, ExecutionEvent};
use crate::queue::QueuedTask;

/// Global atomic counters, independent of any particular run. Cheap to
/// increment from anywhere; never cleared except via [`Metrics::reset`].
pub struct Metrics {
    tasks_enqueued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    locks_acquired: AtomicU64,
}

pub static METRICS: Metrics = Metrics {
    tasks_enqueued: AtomicU64::new(0),
    tasks_completed: AtomicU64::new(0),
    tasks_failed: AtomicU64::new(0),
    locks_acquired: AtomicU64::new(0),
};

impl Metrics {
    pub fn inc_tasks_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_locks_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) -> (u64, u64, u64, u64) {
        (
            self.tasks_enqueued.load(Ordering::Relaxed),
            self.tasks_completed.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed),
            self.locks_acquired.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.tasks_enqueued.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.locks_acquired.store(0, Ordering::Relaxed);
    }
}

/// A recorded busy interval for one worker, used to compute utilization.
#[derive(Debug, Clone)]
struct BusyInterval {
    worker_id: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

struct CollectorState {
    busy_intervals: Vec<BusyInterval>,
}

/// Per-run collector: tracks busy intervals on worker state transitions so
/// [`PerformanceMetricsCollector::worker_utilization`] can be computed
/// without re-deriving it from the merged event log each time.
#[derive(Default)]
pub struct PerformanceMetricsCollector {
    state: Mutex<CollectorState>,
}

impl PerformanceMetricsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState { busy_intervals: Vec::new() }),
        }
    }

    pub async fn record_busy_start(&self, worker_id: &str) {
        let mut state = self.state.lock().await;
        state.busy_intervals.push(BusyInterval {
            worker_id: worker_id.to_string(),
            start: Utc::now(),
            end: None,
        });
    }

    pub async fn record_busy_end(&self, worker_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(interval) = state
            .busy_intervals
            .iter_mut()
            .rev()
            .find(|i| i.worker_id == worker_id && i.end.is_none())
        {
            interval.end = Some(Utc::now());
        }
    }

    /// `sum(busy_time) / (elapsed * worker_count)`, in `[0, 1]`.
    pub async fn worker_utilization(&self, elapsed_ms: i64, worker_count: usize) -> f64 {
        if elapsed_ms <= 0 || worker_count == 0 {
            return 0.0;
        }
        let state = self.state.lock().await;
        let now = Utc::now();
        let busy_ms: i64 = state
            .busy_intervals
            .iter()
            .map(|i| (i.end.unwrap_or(now) - i.start).num_milliseconds())
            .sum();
        (busy_ms as f64 / (elapsed_ms as f64 * worker_count as f64)).clamp(0.0, 1.0)
    }

    /// `(completed * avg_duration / elapsed) / worker_count`, capped at 100%.
    pub fn parallelism_efficiency(completed: usize, avg_duration_ms: f64, elapsed_ms: f64, worker_count: usize) -> f64 {
        if elapsed_ms <= 0.0 || worker_count == 0 {
            return 0.0;
        }
        let speedup = (completed as f64 * avg_duration_ms) / elapsed_ms;
        ((speedup / worker_count as f64) * 100.0).clamp(0.0, 100.0)
    }
}

/// Walk the merged event log, +1 on `task_started`, -1 on
/// `task_completed|task_failed`, producing a piecewise parallelism series.
pub fn parallelism_timeline(events: &[ExecutionEvent]) -> Vec<(DateTime<Utc>, i64)> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.timestamp);
    let mut level: i64 = 0;
    let mut series = Vec::with_capacity(sorted.len());
    for event in &sorted {
        match event.kind {
            EventKind::TaskStarted => level += 1,
            EventKind::TaskCompleted | EventKind::TaskFailed => level -= 1,
            _ => continue,
        }
        series.push((event.timestamp, level));
    }
    series
}

pub fn average_task_duration_ms(completed: &[QueuedTask]) -> f64 {
    let durations: Vec<i64> = completed
        .iter()
        .filter_map(|t| match (t.started_at, t.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        })
        .collect();
    if durations.is_empty() {
        return 0.0;
    }
    durations.iter().sum::<i64>() as f64 / durations.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment_and_reset() {
        METRICS.reset();
        METRICS.inc_tasks_enqueued();
        METRICS.inc_tasks_completed();
        let (enqueued, completed, failed, locks) = METRICS.flush();
        assert_eq!(enqueued, 1);
        assert_eq!(completed, 1);
        assert_eq!(failed, 0);
        assert_eq!(locks, 0);
        METRICS.reset();
    }

    #[tokio::test]
    async fn test_worker_utilization_bounds() {
        let collector = PerformanceMetricsCollector::new();
        collector.record_busy_start("w1").await;
        collector.record_busy_end("w1").await;
        let util = collector.worker_utilization(1000, 1).await;
        assert!((0.0..=1.0).contains(&util));
    }

    #[test]
    fn test_parallelism_efficiency_caps_at_100() {
        let eff = PerformanceMetricsCollector::parallelism_efficiency(100, 100_000.0, 1000.0, 1);
        assert_eq!(eff, 100.0);
    }

    #[test]
    fn test_parallelism_timeline_tracks_level() {
        let t0 = Utc::now();
        let events = vec![
            ExecutionEvent {
                timestamp: t0,
                kind: EventKind::TaskStarted,
                task_id: None,
                worker_id: None,
                details: None,
                emitter: "queue",
                sequence: 0,
            },
            ExecutionEvent {
                timestamp: t0 + chrono::Duration::seconds(1),
                kind: EventKind::TaskCompleted,
                task_id: None,
                worker_id: None,
                details: None,
                emitter: "queue",
                sequence: 1,
            },
        ];
        let series = parallelism_timeline(&events);
        assert_eq!(series, vec![(t0, 1), (t0 + chrono::Duration::seconds(1), 0)]);
    }
}
