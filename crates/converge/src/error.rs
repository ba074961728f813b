//! Error types for task reconciliation.
//!
//! Errors are categorized so a caller can tell a root-cause failure
//! (a task that could not be found, validated or rendered) apart from
//! problems with the graph itself and from whole-run outcomes.

use crate::task::TaskKey;
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Actual state could not be determined
    Lookup,
    /// A field that may not change once the resource exists was changed
    ImmutableField,
    /// The expected instance is missing mandatory data
    RequiredField,
    /// The side effect could not be completed
    Render,
    /// The resource does not match and the lifecycle forbids converging it
    Validation,
    /// Two builders disagree about one task
    DuplicateTask,
    /// The graph references unknown tasks or contains a cycle
    Graph,
    /// The task panicked or the scheduler could not start
    Internal,
    /// Summary of a run that did not fully converge
    Run,
}

impl ErrorKind {
    /// Whether errors of this kind are raised while building the graph,
    /// before any task executes.
    pub fn is_build_time(&self) -> bool {
        matches!(self, Self::DuplicateTask | Self::Graph)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Lookup => "Could not read actual state",
            Self::ImmutableField => "Immutable field changed",
            Self::RequiredField => "Required field missing",
            Self::Render => "Could not apply changes",
            Self::Validation => "Resource does not match",
            Self::DuplicateTask => "Conflicting task definitions",
            Self::Graph => "Invalid task graph",
            Self::Internal => "Internal error",
            Self::Run => "Run did not converge",
        }
    }
}

/// Errors that can occur while building or executing a task graph.
#[derive(Debug, Error)]
pub enum Error {
    /// Find could not determine actual state (distinct from "not found")
    #[error("lookup failed: {0:#}")]
    Lookup(#[source] anyhow::Error),

    /// CheckChanges rejected a change to an immutable field
    #[error("field {field} cannot be changed once the resource exists")]
    ImmutableField {
        /// Name of the immutable field
        field: &'static str,
    },

    /// The expected instance is missing mandatory data
    #[error("field {field} is required")]
    RequiredField {
        /// Name of the missing field
        field: &'static str,
    },

    /// Render could not complete the side effect
    #[error("render failed: {0:#}")]
    Render(#[source] anyhow::Error),

    /// Lifecycle requires the resource to exist, but it does not
    #[error("resource does not exist")]
    NotFound,

    /// Lifecycle requires the resource to match, but it differs
    #[error("resource differs from expected in: {}", .fields.join(", "))]
    Mismatch {
        /// Fields that differ
        fields: Vec<&'static str>,
    },

    /// Two builders submitted different definitions under one key
    #[error("task {key} submitted by {first} and {second} with different definitions")]
    DuplicateTask {
        /// The contested key
        key: TaskKey,
        /// Builder that submitted the task first
        first: String,
        /// Builder that submitted the conflicting definition
        second: String,
    },

    /// A task depends on a key nobody registered
    #[error("task {task} depends on unknown task {dependency}")]
    MissingDependency {
        /// The dependent task
        task: TaskKey,
        /// The unregistered dependency
        dependency: TaskKey,
    },

    /// An explicit dependency names a dependent nobody registered
    #[error("dependency on {dependency} declared for unknown task {task}")]
    UnknownDependent {
        /// The unregistered dependent
        task: TaskKey,
        /// The dependency it was declared against
        dependency: TaskKey,
    },

    /// The dependency edges do not form a DAG
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    Cycle {
        /// A representative cycle, in edge order
        cycle: Vec<TaskKey>,
    },

    /// The task panicked while running
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string
        message: String,
    },

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The run finished without converging every task
    #[error("{failed} task(s) failed, {skipped} skipped, {cancelled} cancelled")]
    RunFailed {
        /// Tasks that failed themselves
        failed: usize,
        /// Tasks skipped because an ancestor failed
        skipped: usize,
        /// Tasks never attempted because the run was cancelled
        cancelled: usize,
    },
}

impl Error {
    /// Wrap a failure to read actual state.
    pub fn lookup(err: impl Into<anyhow::Error>) -> Self {
        Error::Lookup(err.into())
    }

    /// Wrap a failure to apply changes.
    pub fn render(err: impl Into<anyhow::Error>) -> Self {
        Error::Render(err.into())
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Lookup(_) => ErrorKind::Lookup,
            Error::ImmutableField { .. } => ErrorKind::ImmutableField,
            Error::RequiredField { .. } => ErrorKind::RequiredField,
            Error::Render(_) => ErrorKind::Render,
            Error::NotFound | Error::Mismatch { .. } => ErrorKind::Validation,
            Error::DuplicateTask { .. } => ErrorKind::DuplicateTask,
            Error::MissingDependency { .. }
            | Error::UnknownDependent { .. }
            | Error::Cycle { .. } => ErrorKind::Graph,
            Error::Panicked { .. } | Error::ThreadPool(_) => ErrorKind::Internal,
            Error::RunFailed { .. } => ErrorKind::Run,
        }
    }
}

fn format_cycle(cycle: &[TaskKey]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
