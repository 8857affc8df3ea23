//! Resource lock manager: reader/writer locks per resource id, TTL expiry,
//! snapshot + rollback, and conflict prediction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::queue::QueuedTask;
use crate::task::Task;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SNAPSHOT_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub resource_id: String,
    pub lock_type: LockMode,
    pub worker_id: String,
    pub task_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Deep-copy of lock state at an instant, plus the queued tasks and workers
/// that existed then, kept purely for observation. Rollback only restores
/// the lock table.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub locks: Vec<ResourceLock>,
    pub queued_tasks: Vec<QueuedTask>,
}

struct LockState {
    /// Multiple entries per resource id are possible only for read locks.
    locks: HashMap<String, Vec<ResourceLock>>,
    snapshots: VecDeque<ExecutionSnapshot>,
}

pub struct ResourceLockManager {
    state: Mutex<LockState>,
}

impl Default for ResourceLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLockManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                locks: HashMap::new(),
                snapshots: VecDeque::with_capacity(SNAPSHOT_RING_CAPACITY),
            }),
        }
    }

    fn try_acquire_locked(state: &mut LockState, resource_id: &str, mode: LockMode) -> bool {
        let now = Utc::now();
        let entries = state.locks.entry(resource_id.to_string()).or_default();
        entries.retain(|l| l.expires_at >= now);

        if entries.is_empty() {
            return true;
        }
        if mode == LockMode::Read && entries.iter().all(|l| l.lock_type == LockMode::Read) {
            return true;
        }
        false
    }

    /// Polling acquisition; returns `false` once `timeout` elapses without
    /// success. A new acquire succeeds when there is no live lock, the
    /// existing lock has expired (and is evicted), or both the existing
    /// lock and the request are reads.
    pub async fn acquire(
        &self,
        resource_id: &str,
        mode: LockMode,
        worker_id: &str,
        task_id: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if Self::try_acquire_locked(&mut state, resource_id, mode) {
                    let now = Utc::now();
                    let lock = ResourceLock {
                        resource_id: resource_id.to_string(),
                        lock_type: mode,
                        worker_id: worker_id.to_string(),
                        task_id: task_id.to_string(),
                        acquired_at: now,
                        expires_at: now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30)),
                    };
                    state.locks.entry(resource_id.to_string()).or_default().push(lock);
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Only the owning worker may release; a mismatched release is logged
    /// and ignored rather than treated as fatal.
    pub async fn release(&self, resource_id: &str, worker_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entries) = state.locks.get_mut(resource_id) {
            let before = entries.len();
            entries.retain(|l| l.worker_id != worker_id);
            if entries.len() == before {
                tracing::warn!(resource_id, worker_id, "release by non-owning worker ignored");
            }
        }
    }

    /// Used after a worker crash; returns the number of locks released.
    pub async fn release_all_for_worker(&self, worker_id: &str) -> usize {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for entries in state.locks.values_mut() {
            let before = entries.len();
            entries.retain(|l| l.worker_id != worker_id);
            released += before - entries.len();
        }
        released
    }

    pub async fn snapshot(&self, queued_tasks: Vec<QueuedTask>) -> DateTime<Utc> {
        let mut state = self.state.lock().await;
        let timestamp = Utc::now();
        let locks: Vec<ResourceLock> = state.locks.values().flatten().cloned().collect();
        let snap = ExecutionSnapshot {
            timestamp,
            locks,
            queued_tasks,
        };
        if state.snapshots.len() == SNAPSHOT_RING_CAPACITY {
            state.snapshots.pop_front();
        }
        state.snapshots.push_back(snap);
        timestamp
    }

    /// Replace the current lock table with the snapshot taken at
    /// `timestamp`. Tasks/workers are not rolled back, only locks.
    pub async fn rollback_to(&self, timestamp: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        let snap = match state.snapshots.iter().find(|s| s.timestamp == timestamp) {
            Some(s) => s.clone(),
            None => return false,
        };
        let mut by_resource: HashMap<String, Vec<ResourceLock>> = HashMap::new();
        for lock in snap.locks {
            by_resource.entry(lock.resource_id.clone()).or_default().push(lock);
        }
        state.locks = by_resource;
        true
    }

    /// Resources currently held by more than one worker — possible only via
    /// read-sharing, so a non-empty result always describes readers.
    pub async fn detect_conflicts(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut conflicted: Vec<String> = state
            .locks
            .iter()
            .filter(|(_, entries)| {
                let owners: std::collections::HashSet<&str> =
                    entries.iter().map(|l| l.worker_id.as_str()).collect();
                owners.len() > 1
            })
            .map(|(resource, _)| resource.clone())
            .collect();
        conflicted.sort();
        conflicted
    }

    /// Heuristic resource inference from task names and `genesisPattern`
    /// payload field. Purely advisory — no lock is acquired by this call.
    pub async fn predict_conflicts(&self, tasks: &[Task]) -> Vec<(String, Vec<String>)> {
        let mut by_resource: HashMap<String, Vec<String>> = HashMap::new();
        for task in tasks {
            for resource in infer_resources(task) {
                by_resource.entry(resource).or_default().push(task.id.clone());
            }
        }
        let mut contended: Vec<(String, Vec<String>)> = by_resource
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .collect();
        contended.sort_by(|a, b| a.0.cmp(&b.0));
        contended
    }
}

/// Attribute resource ids from a task's lowercased name and optional
/// `genesisPattern` payload field. Intentionally fuzzy — advisory only.
fn infer_resources(task: &Task) -> Vec<String> {
    let name = task.name.to_lowercase();
    let mut resources = Vec::new();
    for (keyword, resource) in [
        ("form", "components/forms/"),
        ("auth", "lib/auth/"),
        ("schema", "lib/schema/"),
        ("migration", "db/migrations/"),
    ] {
        if name.contains(keyword) {
            resources.push(resource.to_string());
        }
    }
    if let Some(pattern) = task.payload.get("genesisPattern").and_then(|v| v.as_str()) {
        resources.push(format!("patterns/{pattern}"));
    }
    resources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_lock_is_exclusive() {
        let mgr = ResourceLockManager::new();
        assert!(mgr.acquire("r1", LockMode::Write, "w1", "t1", Duration::from_millis(50)).await);
        assert!(!mgr.acquire("r1", LockMode::Write, "w2", "t2", Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_read_locks_coexist() {
        let mgr = ResourceLockManager::new();
        assert!(mgr.acquire("r1", LockMode::Read, "w1", "t1", Duration::from_millis(50)).await);
        assert!(mgr.acquire("r1", LockMode::Read, "w2", "t2", Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_mismatched_release_is_ignored() {
        let mgr = ResourceLockManager::new();
        mgr.acquire("r1", LockMode::Write, "w1", "t1", Duration::from_millis(50)).await;
        mgr.release("r1", "w2").await;
        assert!(!mgr.acquire("r1", LockMode::Write, "w3", "t3", Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_snapshot_rollback_restores_locks() {
        let mgr = ResourceLockManager::new();
        mgr.acquire("r1", LockMode::Write, "w1", "t1", Duration::from_secs(30)).await;
        let ts = mgr.snapshot(vec![]).await;
        mgr.release("r1", "w1").await;
        assert!(mgr.acquire("r1", LockMode::Write, "w2", "t2", Duration::from_millis(10)).await);
        mgr.release("r1", "w2").await;
        assert!(mgr.rollback_to(ts).await);
        assert!(!mgr.acquire("r1", LockMode::Write, "w3", "t3", Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_predict_conflicts_groups_by_inferred_resource() {
        let mgr = ResourceLockManager::new();
        let tasks = vec![
            Task::new("a", "Build login form", "worker"),
            Task::new("b", "Style signup form", "worker"),
            Task::new("c", "Write docs", "worker"),
        ];
        let contended = mgr.predict_conflicts(&tasks).await;
        assert_eq!(contended.len(), 1);
        assert_eq!(contended[0].0, "components/forms/");
        assert_eq!(contended[0].1.len(), 2);
    }
}
