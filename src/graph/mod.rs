//! Dependency graph: construction, cycle detection, readiness propagation.
//!
//! # Module layout
//! - [`error`] — `GraphError`, `GraphResult`.
//! - [`resolver`] — `DependencyResolver`, `DependencyNode`, `ReadyPartition`.

pub mod error;
pub mod resolver;

pub use error::{GraphError, GraphResult};
pub use resolver::{DependencyNode, DependencyResolver, ReadyPartition};
