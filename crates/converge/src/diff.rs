//! Field-level diff between actual and expected task instances
//!
//! Each task kind walks its fields through a [`Differ`]; the helpers here
//! are the only place the "ignore if unset" and "edge if reference" rules
//! live.

use crate::field::{Field, TaskRef};
use crate::task::{Task, TaskKey};
use std::collections::BTreeSet;
use std::ops::Deref;

/// Records which fields differ while a task builds its changes shape
#[derive(Debug, Default)]
pub struct Differ {
    changed: Vec<&'static str>,
    references: Vec<TaskKey>,
}

impl Differ {
    /// Compare by value
    ///
    /// Returns `Set(expected)` when the field is set in expected and actual
    /// is absent or holds a different value, `Unset` otherwise.
    pub fn value<T: PartialEq + Clone>(
        &mut self,
        field: &'static str,
        actual: Option<&Field<T>>,
        expected: &Field<T>,
    ) -> Field<T> {
        let Field::Set(want) = expected else {
            return Field::Unset;
        };
        let matches = matches!(actual, Some(Field::Set(have)) if have == want);
        if matches {
            Field::Unset
        } else {
            self.changed.push(field);
            Field::Set(want.clone())
        }
    }

    /// Compare an ordered sequence element by element
    pub fn sequence<T: PartialEq + Clone>(
        &mut self,
        field: &'static str,
        actual: Option<&Field<Vec<T>>>,
        expected: &Field<Vec<T>>,
    ) -> Field<Vec<T>> {
        self.value(field, actual, expected)
    }

    /// Compare a sequence as a set: order and duplicates are ignored
    pub fn set<T: Ord + Clone>(
        &mut self,
        field: &'static str,
        actual: Option<&Field<Vec<T>>>,
        expected: &Field<Vec<T>>,
    ) -> Field<Vec<T>> {
        let Field::Set(want) = expected else {
            return Field::Unset;
        };
        let matches = match actual {
            Some(Field::Set(have)) => {
                have.iter().collect::<BTreeSet<_>>() == want.iter().collect::<BTreeSet<_>>()
            }
            _ => false,
        };
        if matches {
            Field::Unset
        } else {
            self.changed.push(field);
            Field::Set(want.clone())
        }
    }

    /// Compare a reference; a set reference is also a dependency edge
    pub fn reference(
        &mut self,
        field: &'static str,
        actual: Option<&Field<TaskRef>>,
        expected: &Field<TaskRef>,
    ) -> Field<TaskRef> {
        if let Field::Set(target) = expected {
            self.references.push(target.key().clone());
        }
        self.value(field, actual, expected)
    }

    /// Compare a set of references; every one is a dependency edge
    pub fn references(
        &mut self,
        field: &'static str,
        actual: Option<&Field<Vec<TaskRef>>>,
        expected: &Field<Vec<TaskRef>>,
    ) -> Field<Vec<TaskRef>> {
        if let Field::Set(targets) = expected {
            self.references
                .extend(targets.iter().map(|target| target.key().clone()));
        }
        self.set(field, actual, expected)
    }
}

/// The delta between actual and expected: same shape as the task, with
/// only differing fields set
#[derive(Debug, Clone)]
pub struct Changes<T> {
    delta: T,
    fields: Vec<&'static str>,
}

impl<T: Task> Changes<T> {
    pub fn compute(actual: Option<&T>, expected: &T) -> Self {
        let mut differ = Differ::default();
        let delta = T::diff(actual, expected, &mut differ);
        Self {
            delta,
            fields: differ.changed,
        }
    }
}

impl<T> Changes<T> {
    /// No field differs: the task is converged
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of the differing fields, in walk order
    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }

    pub fn delta(&self) -> &T {
        &self.delta
    }
}

impl<T> Deref for Changes<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.delta
    }
}

/// Keys referenced by a task's `TaskRef` fields
pub fn references_of<T: Task>(task: &T) -> Vec<TaskKey> {
    let mut differ = Differ::default();
    let _ = T::diff(None, task, &mut differ);
    differ.references
}
