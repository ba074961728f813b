//! Optional task fields and references between tasks

use crate::task::{Task, TaskKey};

/// A task field: either a desired value, or left for the engine/provider
///
/// Unset fields are never compared, so server-assigned identifiers and
/// other observed-only values stay out of the diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field<T> {
    /// Not managed; ignored when diffing
    Unset,
    /// Desired value; must match actual
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> Field<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset => None,
        }
    }

    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Unset, Self::Set)
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Self::Set(value)
    }
}

/// Reference to another task by key
///
/// A set `Field<TaskRef>` is how one task says "render that one first":
/// the graph builder turns every reference into a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskRef(TaskKey);

impl TaskRef {
    /// Reference the task of kind `T` named `name`
    pub fn to<T: Task>(name: impl Into<String>) -> Self {
        Self(TaskKey::new(T::KIND, name))
    }

    pub fn key(&self) -> &TaskKey {
        &self.0
    }

    pub fn into_key(self) -> TaskKey {
        self.0
    }
}

impl From<TaskKey> for TaskRef {
    fn from(key: TaskKey) -> Self {
        Self(key)
    }
}

impl<T: Task> From<&T> for TaskRef {
    fn from(task: &T) -> Self {
        Self(task.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Volume;

    #[test]
    fn test_field_defaults_to_unset() {
        let field: Field<String> = Field::default();
        assert!(field.is_unset());
        assert_eq!(field.get(), None);
    }

    #[test]
    fn test_field_option_conversions() {
        assert_eq!(Field::from_option(Some(3)), Field::Set(3));
        assert_eq!(Field::<u8>::from_option(None), Field::Unset);
        assert_eq!(Field::from("x").into_option(), Some("x"));
    }

    #[test]
    fn test_task_ref_points_at_key() {
        let volume = Volume::new("etcd-main", "x", 1);
        let by_task = TaskRef::from(&volume);
        let by_name = TaskRef::to::<Volume>("etcd-main");
        assert_eq!(by_task, by_name);
        assert_eq!(by_name.key().to_string(), "Volume/etcd-main");
    }
}
