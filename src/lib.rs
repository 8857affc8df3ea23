//! A parallel DAG task-execution engine: dependency-aware scheduling,
//! resource locking, worker pools, and auto-scaling over an injected
//! [`TaskRunner`].
//!
//! # Module layout
//! - [`graph`] — dependency graph construction, cycle detection, readiness (C1).
//! - [`queue`] — priority-aware task queue and its state machine (C2).
//! - [`locks`] — reader/writer resource locks, snapshot + rollback (C3).
//! - [`scheduler`] — task-selection strategies (C4).
//! - [`pool`] — worker lifecycle and the `TaskRunner` injection point (C5).
//! - [`autoscale`] — queue/idle-driven pool resizing (C6).
//! - [`progress`] — derived metrics and human-readable reporting (C7).
//! - [`estimator`] — per-(agent, complexity) duration estimation (C8).
//! - [`metrics`] — ambient counters and per-run performance metrics (C9).
//! - [`executor`] — the orchestrating event loop (C10).
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowline_core::config::ExecutorConfig;
//! use flowline_core::executor::Executor;
//! use flowline_core::task::{ExecutionPlan, Task};
//!
//! # async fn run(runner: Arc<dyn flowline_core::pool::TaskRunner>) {
//! let plan = ExecutionPlan::new("demo", vec![Task::new("a", "Task A", "worker")]);
//! let executor = Executor::new(ExecutorConfig::default(), runner);
//! let result = executor.execute(plan).await.unwrap();
//! assert!(result.success);
//! # }
//! ```

pub mod autoscale;
pub mod config;
pub mod error;
pub mod estimator;
pub mod events;
pub mod executor;
pub mod graph;
pub mod locks;
pub mod metrics;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod telemetry;

pub use config::{AutoScalingConfig, ExecutorConfig, TaskQueueConfig, WorkerPoolConfig};
pub use error::{CoreResult, ExecutionError};
pub use executor::{ExecutionResult, Executor};
pub use graph::{DependencyResolver, GraphError};
pub use pool::{TaskResult, TaskRunner, WorkerPool};
pub use queue::TaskQueue;
pub use scheduler::SchedulingStrategy;
pub use task::{ExecutionPlan, Task};
