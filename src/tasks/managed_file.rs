//! Objects in the cluster's managed config store

use anyhow::Context as _;
use converge::{Changes, Context, Differ, Error, Field, Result, Task};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// A named object stored at `location` under the config base
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedFile {
    pub name: String,
    /// Store base; the context's config base when unset
    pub base: Field<String>,
    pub location: Field<String>,
    pub contents: Field<Vec<u8>>,
    pub public: Field<bool>,
}

impl ManagedFile {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            base: Field::Unset,
            location: Field::Set(location.into()),
            contents: Field::Set(contents.into()),
            public: Field::Unset,
        }
    }

    fn location(&self) -> &str {
        self.location.get().map_or("", String::as_str)
    }

    fn base_path(&self, ctx: &Context) -> Result<PathBuf> {
        match self.base.get() {
            Some(base) => {
                let local = base.strip_prefix("file://").unwrap_or(base);
                if local.contains("://") {
                    return Err(Error::lookup(anyhow::anyhow!(
                        "unsupported managed file base {base:?}"
                    )));
                }
                Ok(PathBuf::from(local))
            }
            None => Ok(ctx.config_base().to_path_buf()),
        }
    }
}

impl Task for ManagedFile {
    const KIND: &'static str = "ManagedFile";

    fn name(&self) -> String {
        self.name.clone()
    }

    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
        Self {
            name: expected.name.clone(),
            base: differ.value("base", actual.map(|a| &a.base), &expected.base),
            location: differ.value("location", actual.map(|a| &a.location), &expected.location),
            contents: differ.value("contents", actual.map(|a| &a.contents), &expected.contents),
            public: differ.value("public", actual.map(|a| &a.public), &expected.public),
        }
    }

    fn find(&self, ctx: &Context) -> Result<Option<Self>> {
        let location = self.location();
        if location.is_empty() {
            return Ok(None);
        }

        let path = self.base_path(ctx)?.join(location);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::lookup(
                    anyhow::Error::new(e).context(format!("reading {}", path.display())),
                ));
            }
        };

        // Only the contents are observable in the store
        Ok(Some(Self {
            name: self.name.clone(),
            base: self.base.clone(),
            location: self.location.clone(),
            contents: Field::Set(data),
            public: self.public.clone(),
        }))
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        if actual.is_some() && changes.location.is_set() {
            return Err(Error::ImmutableField { field: "location" });
        }
        if expected.contents.is_unset() {
            return Err(Error::RequiredField { field: "contents" });
        }
        Ok(())
    }

    fn render(
        ctx: &Context,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let location = expected.location();
        if location.is_empty() {
            return Err(Error::RequiredField { field: "location" });
        }

        let data = expected
            .contents
            .get()
            .ok_or(Error::RequiredField { field: "contents" })?;

        let path = expected.base_path(ctx)?.join(location);
        if expected.public.get() == Some(&true) {
            return Err(Error::render(anyhow::anyhow!(
                "the {:?} path does not support public ACL",
                path.display().to_string()
            )));
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))
                .map_err(Error::Render)?;
        }
        fs::write(&path, data)
            .with_context(|| format!("error creating ManagedFile {location:?}"))
            .map_err(Error::Render)?;
        Ok(())
    }
}
