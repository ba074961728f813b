//! Files and directories on the node

use anyhow::Context as _;
use converge::{Changes, Context, Differ, Error, Field, Result, Task, TaskRef};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Where a file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    Inline(Vec<u8>),
    /// Named secret from the context's secret store
    Secret(String),
    /// A file in the local asset store
    Asset(PathBuf),
}

impl Contents {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Inline(text.into().into_bytes())
    }

    /// The bytes this source stands for
    pub fn resolve(&self, ctx: &Context) -> anyhow::Result<Vec<u8>> {
        match self {
            Self::Inline(bytes) => Ok(bytes.clone()),
            Self::Secret(name) => Ok(ctx.secret(name)?),
            Self::Asset(path) => {
                fs::read(path).with_context(|| format!("Could not read asset {}", path.display()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

/// A file or directory at an absolute host path
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub path: String,
    pub file_type: Field<FileType>,
    pub contents: Field<Contents>,
    pub mode: Field<u32>,
    /// Parent directory task, when the parent is managed too
    pub parent: Field<TaskRef>,
}

impl File {
    pub fn new(path: impl Into<String>, contents: Contents) -> Self {
        Self {
            path: path.into(),
            file_type: Field::Set(FileType::File),
            contents: Field::Set(contents),
            mode: Field::Unset,
            parent: Field::Unset,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_type: Field::Set(FileType::Directory),
            contents: Field::Unset,
            mode: Field::Unset,
            parent: Field::Unset,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Field::Set(mode);
        self
    }

    pub fn with_parent(mut self, parent: TaskRef) -> Self {
        self.parent = Field::Set(parent);
        self
    }

    fn is_directory(&self) -> bool {
        self.file_type.get() == Some(&FileType::Directory)
    }
}

impl Task for File {
    const KIND: &'static str = "File";

    fn name(&self) -> String {
        self.path.clone()
    }

    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
        Self {
            path: expected.path.clone(),
            file_type: differ.value("file_type", actual.map(|a| &a.file_type), &expected.file_type),
            contents: differ.value("contents", actual.map(|a| &a.contents), &expected.contents),
            mode: differ.value("mode", actual.map(|a| &a.mode), &expected.mode),
            parent: differ.reference("parent", actual.map(|a| &a.parent), &expected.parent),
        }
    }

    fn find(&self, ctx: &Context) -> Result<Option<Self>> {
        let path = ctx.path_for(&self.path)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::lookup(
                    anyhow::Error::new(e).context(format!("reading {}", path.display())),
                ));
            }
        };

        let mode = metadata.permissions().mode() & 0o7777;
        if metadata.is_dir() {
            return Ok(Some(Self {
                path: self.path.clone(),
                file_type: Field::Set(FileType::Directory),
                contents: Field::Unset,
                mode: Field::Set(mode),
                parent: self.parent.clone(),
            }));
        }

        let bytes = fs::read(&path)
            .with_context(|| format!("reading {}", path.display()))
            .map_err(Error::Lookup)?;

        // Report the expected source when the bytes match it, so a secret
        // or asset that was already written compares equal
        let contents = match self.contents.get() {
            Some(source) if !matches!(source, Contents::Inline(_)) => {
                let wanted = source.resolve(ctx).map_err(Error::Lookup)?;
                if wanted == bytes {
                    source.clone()
                } else {
                    Contents::Inline(bytes)
                }
            }
            _ => Contents::Inline(bytes),
        };

        Ok(Some(Self {
            path: self.path.clone(),
            file_type: Field::Set(FileType::File),
            contents: Field::Set(contents),
            mode: Field::Set(mode),
            parent: self.parent.clone(),
        }))
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        if actual.is_some() && changes.file_type.is_set() {
            return Err(Error::ImmutableField { field: "file_type" });
        }
        if expected.file_type.is_unset() {
            return Err(Error::RequiredField { field: "file_type" });
        }
        if !expected.is_directory() && expected.contents.is_unset() {
            return Err(Error::RequiredField { field: "contents" });
        }
        Ok(())
    }

    fn render(
        ctx: &Context,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let path = ctx.path_for(&expected.path)?;

        if expected.is_directory() {
            fs::create_dir_all(&path)
                .with_context(|| format!("creating directory {}", path.display()))
                .map_err(Error::Render)?;
        } else if let Some(contents) = changes.contents.get() {
            let bytes = contents.resolve(ctx).map_err(Error::Render)?;
            // An unset mode keeps whatever the replaced file had
            let mode = expected
                .mode
                .get()
                .or_else(|| actual.and_then(|a| a.mode.get()))
                .copied();
            write_file(&path, &bytes, mode).map_err(Error::Render)?;
        }

        if let Some(mode) = expected.mode.get()
            && (actual.is_none() || changes.mode.is_set())
        {
            fs::set_permissions(&path, fs::Permissions::from_mode(*mode))
                .with_context(|| format!("setting mode {mode:o} on {}", path.display()))
                .map_err(Error::Render)?;
        }

        Ok(())
    }
}

/// Write through a sibling temp file so readers never see a partial file
fn write_file(path: &Path, bytes: &[u8], mode: Option<u32>) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.nodeup-tmp"));

    let written = write_tmp(&tmp, bytes, mode).and_then(|()| {
        fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_tmp(tmp: &Path, bytes: &[u8], mode: Option<u32>) -> anyhow::Result<()> {
    let mut file = fs::File::create(tmp).with_context(|| format!("creating {}", tmp.display()))?;
    if let Some(mode) = mode {
        file.set_permissions(fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting mode on {}", tmp.display()))?;
    }
    file.write_all(bytes)
        .with_context(|| format!("writing {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", tmp.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{ApplyResult, ExecuteOptions, MemorySecrets, TaskGraph, execute_simple};

    fn context(root: &Path) -> Context {
        Context::builder()
            .root(root)
            .secrets(MemorySecrets::new().with("token", "s3cr3t"))
            .build()
    }

    fn apply(ctx: &Context, task: File) -> ApplyResult {
        let mut graph = TaskGraph::new();
        graph.add_task(task).unwrap();
        let plan = graph.build().unwrap();
        let report = execute_simple(&plan, ctx, &ExecuteOptions::default()).unwrap();
        report.ensure_success().unwrap();
        match report.tasks()[0].outcome {
            converge::TaskOutcome::Converged(ref result) => result.clone(),
            ref other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_hello_file_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let task = File::new("/tmp/hello", Contents::text("hello")).with_mode(0o644);

        assert_eq!(task.find(&ctx).unwrap(), None);
        let changes = Changes::compute(None, &task);
        assert_eq!(changes.fields(), ["file_type", "contents", "mode"]);

        let first = apply(&ctx, task.clone());
        assert!(matches!(first, ApplyResult::Created { .. }));
        let written = root.path().join("tmp/hello");
        assert_eq!(fs::read(&written).unwrap(), b"hello");
        assert_eq!(fs::metadata(&written).unwrap().permissions().mode() & 0o777, 0o644);

        let second = apply(&ctx, task);
        assert_eq!(second, ApplyResult::NoChange);
    }

    #[test]
    fn test_render_then_find_converges() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(root.path().join("etc/motd"), "old").unwrap();

        let task = File::new("/etc/motd", Contents::text("new")).with_mode(0o600);
        let result = apply(&ctx, task.clone());
        assert_eq!(
            result,
            ApplyResult::Updated {
                fields: vec!["contents", "mode"]
            }
        );

        let actual = task.find(&ctx).unwrap();
        assert!(Changes::compute(actual.as_ref(), &task).is_empty());
    }

    #[test]
    fn test_contents_update_keeps_existing_mode() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let key = root.path().join("etc/app.key");
        fs::create_dir_all(key.parent().unwrap()).unwrap();
        fs::write(&key, "old").unwrap();
        fs::set_permissions(&key, fs::Permissions::from_mode(0o600)).unwrap();

        let result = apply(&ctx, File::new("/etc/app.key", Contents::text("new")));
        assert_eq!(
            result,
            ApplyResult::Updated {
                fields: vec!["contents"]
            }
        );
        assert_eq!(fs::read(&key).unwrap(), b"new");
        assert_eq!(fs::metadata(&key).unwrap().permissions().mode() & 0o7777, 0o600);
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("busy");
        fs::create_dir_all(target.join("inside")).unwrap();

        assert!(write_file(&target, b"x", None).is_err());
        assert!(!root.path().join(".busy.nodeup-tmp").exists());
    }

    #[test]
    fn test_secret_contents_are_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let task = File::new("/var/lib/token", Contents::Secret("token".into())).with_mode(0o400);

        apply(&ctx, task.clone());
        assert_eq!(fs::read(root.path().join("var/lib/token")).unwrap(), b"s3cr3t");
        assert_eq!(apply(&ctx, task), ApplyResult::NoChange);
    }

    #[test]
    fn test_directory_then_file_type_is_immutable() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        apply(&ctx, File::directory("/opt/kops/bin").with_mode(0o755));
        assert!(root.path().join("opt/kops/bin").is_dir());

        let clash = File::new("/opt/kops/bin", Contents::text("x"));
        let actual = clash.find(&ctx).unwrap();
        let changes = Changes::compute(actual.as_ref(), &clash);
        let err = File::check_changes(actual.as_ref(), &clash, &changes).unwrap_err();
        assert!(matches!(err, Error::ImmutableField { field: "file_type" }));
    }

    #[test]
    fn test_regular_file_requires_contents() {
        let mut task = File::new("/etc/empty", Contents::text(""));
        task.contents = Field::Unset;
        let changes = Changes::compute(None, &task);
        let err = File::check_changes(None, &task, &changes).unwrap_err();
        assert!(matches!(err, Error::RequiredField { field: "contents" }));
    }

    #[test]
    fn test_parent_reference_is_a_dependency() {
        let task = File::new("/opt/kops/bin/protokube", Contents::text("x"))
            .with_parent(TaskRef::to::<File>("/opt/kops/bin"));
        assert_eq!(
            converge::references_of(&task),
            vec![converge::TaskKey::new("File", "/opt/kops/bin")]
        );
    }
}
