//! Append-only execution event log, bounded per emitter and merged by
//! stable sort at shutdown.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskQueued,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    WorkerStarted,
    WorkerStopped,
}

/// A single append-only log entry. `emitter` and `sequence` together give a
/// deterministic tie-break for events sharing a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub task_id: Option<String>,
    pub worker_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub emitter: &'static str,
    pub sequence: u64,
}

impl ExecutionEvent {
    fn new(kind: EventKind, emitter: &'static str, sequence: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            task_id: None,
            worker_id: None,
            details: None,
            emitter,
            sequence,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Bounded ring buffer of the most recent [`RING_CAPACITY`] events emitted
/// by one component. Each emitter owns its own ring; the executor merges
/// them at shutdown.
#[derive(Debug, Default)]
pub struct EventLog {
    emitter: &'static str,
    events: VecDeque<ExecutionEvent>,
    next_sequence: u64,
}

impl EventLog {
    pub fn new(emitter: &'static str) -> Self {
        Self {
            emitter,
            events: VecDeque::with_capacity(RING_CAPACITY),
            next_sequence: 0,
        }
    }

    pub fn record(&mut self, kind: EventKind) -> &ExecutionEvent {
        let event = ExecutionEvent::new(kind, self.emitter, self.next_sequence);
        self.next_sequence += 1;
        if self.events.len() == RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.events.back().unwrap()
    }

    pub fn record_full(&mut self, mut event: ExecutionEvent) {
        event.emitter = self.emitter;
        event.sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.events.len() == RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Merge several emitters' event logs into one stable-sorted timeline:
/// primarily by timestamp, ties broken by emitter name then insertion
/// (sequence) order.
pub fn merge_timelines(logs: &[Vec<ExecutionEvent>]) -> Vec<ExecutionEvent> {
    let mut merged: Vec<ExecutionEvent> = logs.iter().flatten().cloned().collect();
    merged.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.emitter.cmp(b.emitter))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_bounds_capacity() {
        let mut log = EventLog::new("queue");
        for _ in 0..(RING_CAPACITY + 10) {
            log.record(EventKind::TaskQueued);
        }
        assert_eq!(log.snapshot().len(), RING_CAPACITY);
    }

    #[test]
    fn test_merge_timelines_is_stable_by_timestamp_then_emitter() {
        let mut queue_log = EventLog::new("queue");
        let mut pool_log = EventLog::new("pool");
        queue_log.record(EventKind::TaskQueued);
        pool_log.record(EventKind::WorkerStarted);
        let merged = merge_timelines(&[queue_log.snapshot(), pool_log.snapshot()]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_event_builder_sets_fields() {
        let mut log = EventLog::new("queue");
        log.record_full(
            ExecutionEvent::new(EventKind::TaskFailed, "queue", 0)
                .with_task("t1")
                .with_worker("w1"),
        );
        let snap = log.snapshot();
        assert_eq!(snap[0].task_id.as_deref(), Some("t1"));
        assert_eq!(snap[0].worker_id.as_deref(), Some("w1"));
    }
}
