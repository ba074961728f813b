//! # Converge
//!
//! A task reconciliation engine.
//!
//! Callers declare the expected state of a set of resources as tasks. The
//! engine finds the actual state of each one, computes the field-level
//! difference, validates it, and renders the change, running independent
//! tasks concurrently and dependent ones in order.
//!
//! ## Core Concepts
//!
//! - **Task**: One desired resource plus Find / CheckChanges / Render
//! - **Field**: A task field that is either set (managed) or unset (ignored)
//! - **Lifecycle**: Whether a difference is rendered, warned about, or fatal
//! - **TaskGraph**: Registry that builders submit tasks into
//! - **ExecutionPlan**: The checked, topologically ordered graph
//! - **Executor**: Runs a plan on a bounded worker pool
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Context, ExecuteOptions, TaskGraph, execute_simple};
//!
//! let mut graph = TaskGraph::new();
//! graph.set_source("motd");
//! graph.add_task(Motd { text: "hello".to_string().into() })?;
//!
//! let plan = graph.build()?;
//! let ctx = Context::builder().root("/").build();
//! let report = execute_simple(&plan, &ctx, &ExecuteOptions::default())?;
//! report.ensure_success()?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`SecretStore`]: Supplies secret material to tasks
//! - [`ProgressCallback`]: Receives scheduler progress
//! - [`ModelBuilder`]: Contributes tasks to a graph

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod field;
pub mod graph;
pub mod planner;
pub mod report;
pub mod task;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use context::{
    CancelToken, Context, ContextBuilder, MemorySecrets, NoProgress, NoSecrets, ProgressCallback,
    SecretStore,
};
pub use diff::{Changes, Differ, references_of};
pub use error::{Error, ErrorKind, Result};
pub use executor::{execute, execute_simple};
pub use field::{Field, TaskRef};
pub use graph::{LifecycleOverrides, ModelBuilder, TaskGraph};
pub use planner::ExecutionPlan;
pub use report::{RunReport, TaskRecord, TaskReport};
pub use task::{Lifecycle, Task, TaskKey};
pub use types::{ApplyResult, ExecuteOptions, ExecuteSummary, TaskOutcome, TaskState};
