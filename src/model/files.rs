//! Files and managed files declared directly in the node config

use anyhow::{Context, Result};
use converge::{Field, Lifecycle, ModelBuilder, TaskGraph, TaskRef};
use std::collections::BTreeSet;
use std::path::Path;

use super::NodeModel;
use crate::config::{FileConfig, FileKind, parse_mode};
use crate::tasks::{Contents, File, ManagedFile};

pub struct FilesBuilder<'a> {
    pub model: &'a NodeModel<'a>,
}

impl ModelBuilder for FilesBuilder<'_> {
    fn name(&self) -> &str {
        "files"
    }

    fn build(&self, graph: &mut TaskGraph) -> Result<()> {
        let config = self.model.config;

        let directories: BTreeSet<&str> = config
            .files
            .iter()
            .filter(|f| f.kind == FileKind::Directory)
            .map(|f| f.path.trim_end_matches('/'))
            .collect();

        for entry in &config.files {
            let task = file_task(entry, &directories)?;
            graph
                .add_task_with_lifecycle(task, entry.lifecycle.unwrap_or_default())
                .with_context(|| format!("Adding file {}", entry.path))?;
        }

        for entry in &config.managed_files {
            let mut task = ManagedFile::new(
                &entry.name,
                &entry.location,
                entry.contents.clone().unwrap_or_default(),
            );
            if entry.contents.is_none() {
                task.contents = Field::Unset;
            }
            task.base = Field::from_option(entry.base.clone());
            if entry.public {
                task.public = true.into();
            }
            graph
                .add_task_with_lifecycle(task, entry.lifecycle.unwrap_or(Lifecycle::Sync))
                .with_context(|| format!("Adding managed file {}", entry.name))?;
        }

        Ok(())
    }
}

fn file_task(entry: &FileConfig, directories: &BTreeSet<&str>) -> Result<File> {
    let path = entry.path.trim_end_matches('/');
    let mut task = match entry.kind {
        FileKind::Directory => File::directory(path),
        FileKind::File => {
            let mut file = File::new(path, Contents::Inline(Vec::new()));
            file.contents = match (&entry.contents, &entry.secret) {
                (_, Some(secret)) => Contents::Secret(secret.clone()).into(),
                (Some(text), None) => Contents::text(text.clone()).into(),
                // Left unset so reconciling reports the missing contents
                (None, None) => Field::Unset,
            };
            file
        }
    };

    if let Some(mode) = &entry.mode {
        task = task.with_mode(parse_mode(mode)?);
    }

    if let Some(parent) = Path::new(path).parent().and_then(Path::to_str)
        && directories.contains(parent)
    {
        task = task.with_parent(TaskRef::to::<File>(parent));
    }

    Ok(task)
}
