//! Crate-wide error taxonomy. Mirrors the error kinds of each component
//! without unifying them into a single flat enum — each component keeps its
//! own precise variant set and this type only wraps the ones that can
//! legitimately cross a component boundary.

use thiserror::Error;

use crate::graph::error::GraphError;

/// Errors that can surface from [`crate::executor::Executor::execute`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The declared dependency relation is cyclic. The only fatal error in
    /// the whole core — no work is executed when this is returned.
    #[error(transparent)]
    Cycle(#[from] GraphError),

    /// A worker's `TaskRunner` panicked instead of returning a `TaskResult`.
    #[error("worker '{worker_id}' panicked while running task '{task_id}': {message}")]
    WorkerPanicked {
        worker_id: String,
        task_id: String,
        message: String,
    },
}

/// Convenience result alias for fallible executor operations. Not to be
/// confused with [`crate::executor::ExecutionResult`], the aggregate output
/// struct produced by a (successful or partially-successful) run.
pub type CoreResult<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_wraps_graph_error() {
        let graph_err = GraphError::UnknownDependency {
            dependent: "a".to_string(),
            dependency: "b".to_string(),
        };
        let err: ExecutionError = graph_err.into();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_worker_panicked_display() {
        let err = ExecutionError::WorkerPanicked {
            worker_id: "w1".to_string(),
            task_id: "t1".to_string(),
            message: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("w1"));
        assert!(msg.contains("t1"));
        assert!(msg.contains("boom"));
    }
}
