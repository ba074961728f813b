//! Run report - the final state of every task in a run

use crate::error::{Error, Result};
use crate::task::{Lifecycle, TaskKey};
use crate::types::{ApplyResult, ExecuteSummary, TaskOutcome, TaskState};
use serde::Serialize;
use serde::ser::SerializeStruct;
use std::time::Duration;

/// Outcome of one task, with the timing the scheduler observed
#[derive(Debug)]
pub struct TaskReport {
    pub key: TaskKey,
    pub lifecycle: Lifecycle,
    pub outcome: TaskOutcome,
    /// Time spent on a worker; zero for tasks never dispatched
    pub elapsed: Duration,
}

/// Serializable view of a [`TaskReport`]
#[derive(Debug, Serialize)]
pub struct TaskRecord<'a> {
    pub key: &'a TaskKey,
    pub lifecycle: Lifecycle,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a ApplyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'a TaskKey>,
    pub elapsed_ms: u128,
}

/// Result of executing a plan
///
/// Every task in the plan appears exactly once, in plan order.
#[derive(Debug)]
pub struct RunReport {
    pub(crate) tasks: Vec<TaskReport>,
    pub(crate) completion_order: Vec<TaskKey>,
    pub(crate) elapsed: Duration,
    pub(crate) dry_run: bool,
}

impl RunReport {
    /// Per-task reports in plan (topological) order
    pub fn tasks(&self) -> &[TaskReport] {
        &self.tasks
    }

    /// Keys in the order tasks reached a final state
    pub fn completion_order(&self) -> &[TaskKey] {
        &self.completion_order
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn outcome(&self, key: &TaskKey) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| &t.key == key).map(|t| &t.outcome)
    }

    pub fn state(&self, key: &TaskKey) -> Option<TaskState> {
        self.outcome(key).map(TaskOutcome::state)
    }

    /// Tasks that failed themselves, with their errors
    pub fn root_causes(&self) -> impl Iterator<Item = (&TaskKey, &Error)> {
        self.tasks
            .iter()
            .filter_map(|t| t.outcome.error().map(|err| (&t.key, err)))
    }

    /// Tasks skipped because an ancestor failed, with that ancestor
    pub fn skipped(&self) -> impl Iterator<Item = (&TaskKey, &TaskKey)> {
        self.tasks.iter().filter_map(|t| match &t.outcome {
            TaskOutcome::Skipped { cause } => Some((&t.key, cause)),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Cancelled))
            .map(|t| &t.key)
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for task in &self.tasks {
            summary.add_outcome(&task.outcome);
        }
        summary
    }

    /// Whether every task converged
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.outcome.is_converged())
    }

    /// Turn a run that did not converge into an error
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let summary = self.summary();
        Err(Error::RunFailed {
            failed: summary.failed,
            skipped: summary.skipped,
            cancelled: summary.cancelled,
        })
    }

    pub fn records(&self) -> Vec<TaskRecord<'_>> {
        self.tasks
            .iter()
            .map(|t| TaskRecord {
                key: &t.key,
                lifecycle: t.lifecycle,
                state: t.outcome.state(),
                result: match &t.outcome {
                    TaskOutcome::Converged(result) => Some(result),
                    _ => None,
                },
                error: t.outcome.error().map(ToString::to_string),
                cause: match &t.outcome {
                    TaskOutcome::Skipped { cause } => Some(cause),
                    _ => None,
                },
                elapsed_ms: t.elapsed.as_millis(),
            })
            .collect()
    }
}

impl Serialize for RunReport {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RunReport", 5)?;
        state.serialize_field("success", &self.is_success())?;
        state.serialize_field("dry_run", &self.dry_run)?;
        state.serialize_field("elapsed_ms", &self.elapsed.as_millis())?;
        state.serialize_field("summary", &self.summary())?;
        state.serialize_field("tasks", &self.records())?;
        state.end()
    }
}
