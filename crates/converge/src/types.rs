//! Core types for task execution

use crate::error::Error;
use crate::task::TaskKey;
use serde::Serialize;

/// What reconciling a single task did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApplyResult {
    /// Actual already matched expected
    NoChange,
    /// Lifecycle `Ignore`: not looked at
    Ignored,
    /// Resource did not exist and was created
    Created { fields: Vec<&'static str> },
    /// Resource existed and the listed fields were changed
    Updated { fields: Vec<&'static str> },
    /// Difference detected and logged, nothing changed
    Warned { fields: Vec<&'static str> },
    /// Dry run: these changes passed CheckChanges but were not rendered
    Planned {
        create: bool,
        fields: Vec<&'static str>,
    },
}

impl ApplyResult {
    /// Check if the result represents a change made to the system
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Updated { .. })
    }

    /// Fields that differed, if any
    pub fn fields(&self) -> &[&'static str] {
        match self {
            Self::Created { fields }
            | Self::Updated { fields }
            | Self::Warned { fields }
            | Self::Planned { fields, .. } => fields,
            Self::NoChange | Self::Ignored => &[],
        }
    }
}

/// Scheduler state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on dependencies
    Pending,
    /// All dependencies converged, queued for a worker
    Ready,
    /// Being reconciled on a worker
    Running,
    Converged,
    Failed,
    /// Not attempted because an ancestor failed
    Skipped,
    /// Not attempted because the run was cancelled
    Cancelled,
}

impl TaskState {
    /// Whether the task has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// Final result for one task in a run
#[derive(Debug)]
pub enum TaskOutcome {
    Converged(ApplyResult),
    Failed(Error),
    /// An ancestor failed; `cause` is the failed task
    Skipped { cause: TaskKey },
    Cancelled,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            Self::Converged(_) => TaskState::Converged,
            Self::Failed(_) => TaskState::Failed,
            Self::Skipped { .. } => TaskState::Skipped,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub no_change: usize,
    pub ignored: usize,
    pub warned: usize,
    pub planned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Check if every task converged
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.cancelled == 0
    }

    /// Total number of tasks accounted for
    pub fn total(&self) -> usize {
        self.created
            + self.updated
            + self.no_change
            + self.ignored
            + self.warned
            + self.planned
            + self.failed
            + self.skipped
            + self.cancelled
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Converged(result) => match result {
                ApplyResult::NoChange => self.no_change += 1,
                ApplyResult::Ignored => self.ignored += 1,
                ApplyResult::Created { .. } => self.created += 1,
                ApplyResult::Updated { .. } => self.updated += 1,
                ApplyResult::Warned { .. } => self.warned += 1,
                ApplyResult::Planned { .. } => self.planned += 1,
            },
            TaskOutcome::Failed(_) => self.failed += 1,
            TaskOutcome::Skipped { .. } => self.skipped += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Check changes but do not render them
    pub dry_run: bool,
    /// Number of worker threads
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(&TaskOutcome::Converged(ApplyResult::Created {
            fields: vec!["contents"],
        }));
        summary.add_outcome(&TaskOutcome::Converged(ApplyResult::NoChange));
        summary.add_outcome(&TaskOutcome::Failed(Error::NotFound));
        summary.add_outcome(&TaskOutcome::Skipped {
            cause: TaskKey::new("File", "a"),
        });

        assert_eq!(summary.total(), 4);
        assert_eq!(summary.total_changes(), 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_warned_run_is_still_success() {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(&TaskOutcome::Converged(ApplyResult::Warned {
            fields: vec!["mode"],
        }));
        assert!(summary.is_success());
    }

    #[test]
    fn test_apply_result_fields() {
        let result = ApplyResult::Planned {
            create: false,
            fields: vec!["mode"],
        };
        assert_eq!(result.fields(), ["mode"]);
        assert!(!result.is_change());
        assert!(ApplyResult::NoChange.fields().is_empty());
    }
}
