//! Error types for dependency graph construction and traversal.

use thiserror::Error;

/// Errors produced by the dependency resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The declared dependency relation is not acyclic. Carries every
    /// distinct cycle found during construction, each as an ordered list of
    /// task ids walking the cycle back to its start.
    #[error("dependency graph contains {} cycle(s): {cycles:?}", cycles.len())]
    Cycle { cycles: Vec<Vec<String>> },

    /// A dependency edge referenced a task id that has no node in the graph.
    #[error("task '{dependent}' declares a dependency on unknown task '{dependency}'")]
    UnknownDependency { dependent: String, dependency: String },
}

/// Convenience result alias for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
