//! Task trait for declarative reconciliation
//!
//! A Task describes one desired resource (a file, a service unit, an
//! object in a store) together with the operations the engine needs to
//! converge it: find the actual state, validate a proposed change, and
//! render the change.

use crate::context::Context;
use crate::diff::{Changes, Differ};
use crate::error::{Error, Result};
use crate::types::ApplyResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;

/// Identity of a task: its kind plus a name unique within that kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    kind: &'static str,
    name: String,
}

impl TaskKey {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Serialize for TaskKey {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How a detected difference between actual and expected state is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Render the changes
    #[default]
    Sync,
    /// Neither find nor render the task
    Ignore,
    /// Log the difference and carry on without mutating
    WarnOnly,
    /// Require the resource to exist and match; fail otherwise
    ExistsAndValidates,
    /// Require the resource to exist; warn if it differs
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// Whether the engine may call Render under this policy
    pub fn allows_render(&self) -> bool {
        matches!(self, Self::Sync)
    }

    /// Whether an absent resource fails the task
    pub fn requires_existence(&self) -> bool {
        matches!(self, Self::ExistsAndValidates | Self::ExistsAndWarnIfChanges)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::Ignore => "Ignore",
            Self::WarnOnly => "WarnOnly",
            Self::ExistsAndValidates => "ExistsAndValidates",
            Self::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Sync" => Ok(Self::Sync),
            "Ignore" => Ok(Self::Ignore),
            "WarnOnly" => Ok(Self::WarnOnly),
            "ExistsAndValidates" => Ok(Self::ExistsAndValidates),
            "ExistsAndWarnIfChanges" => Ok(Self::ExistsAndWarnIfChanges),
            other => Err(format!("unknown lifecycle {other:?}")),
        }
    }
}

/// Core trait for reconcilable resources
///
/// Every task kind implements this trait, which provides:
/// - Identity (kind, name)
/// - A field walk used for diffing and dependency discovery
/// - Find / CheckChanges / Render
///
/// # Example
///
/// ```ignore
/// use converge::{Changes, Context, Differ, Field, Result, Task};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Motd {
///     text: Field<String>,
/// }
///
/// impl Task for Motd {
///     const KIND: &'static str = "Motd";
///
///     fn name(&self) -> String {
///         "motd".into()
///     }
///
///     fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
///         Self {
///             text: differ.value("text", actual.map(|a| &a.text), &expected.text),
///         }
///     }
///
///     fn find(&self, ctx: &Context) -> Result<Option<Self>> {
///         let path = ctx.path_for("/etc/motd")?;
///         match std::fs::read_to_string(path) {
///             Ok(text) => Ok(Some(Self { text: text.into() })),
///             Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
///             Err(e) => Err(converge::Error::lookup(e)),
///         }
///     }
///
///     fn check_changes(_: Option<&Self>, _: &Self, _: &Changes<Self>) -> Result<()> {
///         Ok(())
///     }
///
///     fn render(ctx: &Context, _: Option<&Self>, e: &Self, _: &Changes<Self>) -> Result<()> {
///         let text = e.text.get().cloned().unwrap_or_default();
///         std::fs::write(ctx.path_for("/etc/motd")?, text).map_err(converge::Error::render)
///     }
/// }
/// ```
pub trait Task: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Kind name, the first half of every key of this type
    const KIND: &'static str;

    /// Name unique within the kind
    fn name(&self) -> String;

    fn key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.name())
    }

    /// Dependencies that are not expressed through `TaskRef` fields
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Walk every field through `differ`, producing the changes shape
    ///
    /// Each `Field` must go through one of the `Differ` helpers so that
    /// unset fields are ignored and references become graph edges.
    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self;

    /// Read live state. `Ok(None)` means the resource does not exist.
    ///
    /// Must not mutate anything; a failed lookup is `Error::Lookup`.
    fn find(&self, ctx: &Context) -> Result<Option<Self>>;

    /// Validate a transition before any side effect happens
    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes<Self>)
    -> Result<()>;

    /// Create the resource when `actual` is `None`, otherwise apply the
    /// set fields of `changes`
    fn render(
        ctx: &Context,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()>;
}

/// Type-erased task, so one registry can hold every kind
pub(crate) trait DynTask: Send + Sync + fmt::Debug {
    fn key(&self) -> TaskKey;

    /// Keys referenced from `TaskRef` fields plus declared dependencies
    fn dependencies(&self) -> Vec<TaskKey>;

    fn as_any(&self) -> &dyn Any;

    fn same_as(&self, other: &dyn DynTask) -> bool;

    fn reconcile(&self, ctx: &Context, lifecycle: Lifecycle, dry_run: bool) -> Result<ApplyResult>;
}

impl<T: Task> DynTask for T {
    fn key(&self) -> TaskKey {
        Task::key(self)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = crate::diff::references_of(self);
        deps.extend(Task::dependencies(self));
        deps
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn DynTask) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn reconcile(&self, ctx: &Context, lifecycle: Lifecycle, dry_run: bool) -> Result<ApplyResult> {
        reconcile(self, ctx, lifecycle, dry_run)
    }
}

/// Find → Diff → Lifecycle gate → CheckChanges → Render for one task
pub(crate) fn reconcile<T: Task>(
    expected: &T,
    ctx: &Context,
    lifecycle: Lifecycle,
    dry_run: bool,
) -> Result<ApplyResult> {
    let key = Task::key(expected);

    if lifecycle == Lifecycle::Ignore {
        log::debug!("{key}: lifecycle Ignore, not reconciling");
        return Ok(ApplyResult::Ignored);
    }

    let actual = expected.find(ctx)?;
    if actual.is_none() && lifecycle.requires_existence() {
        return Err(Error::NotFound);
    }

    let changes = Changes::compute(actual.as_ref(), expected);

    if changes.is_empty() {
        log::debug!("{key}: no changes");
        return Ok(ApplyResult::NoChange);
    }

    let fields = changes.fields().to_vec();

    match lifecycle {
        Lifecycle::ExistsAndValidates => return Err(Error::Mismatch { fields }),
        Lifecycle::ExistsAndWarnIfChanges | Lifecycle::WarnOnly => {
            log::warn!(
                "{key}: differs from expected in {} ({lifecycle}, not changing)",
                fields.join(", ")
            );
            return Ok(ApplyResult::Warned { fields });
        }
        Lifecycle::Sync | Lifecycle::Ignore => {}
    }

    T::check_changes(actual.as_ref(), expected, &changes)?;

    if dry_run {
        return Ok(ApplyResult::Planned {
            create: actual.is_none(),
            fields,
        });
    }

    T::render(ctx, actual.as_ref(), expected, &changes)?;

    if actual.is_none() {
        Ok(ApplyResult::Created { fields })
    } else {
        Ok(ApplyResult::Updated { fields })
    }
}
