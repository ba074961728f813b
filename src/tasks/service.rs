//! Service task - systemd units

use anyhow::{Context as _, bail};
use converge::{Changes, Context, Differ, Error, Field, Result, Task, TaskRef};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::systemd;

const UNIT_DIR: &str = "/etc/systemd/system";

/// A systemd unit installed under `/etc/systemd/system`
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub definition: Field<String>,
    pub enabled: Field<bool>,
    /// Environment file the unit reads
    pub environment_file: Field<TaskRef>,
    /// Binary the unit runs
    pub binary: Field<TaskRef>,
}

impl Service {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: Field::Set(definition.into()),
            enabled: Field::Set(true),
            environment_file: Field::Unset,
            binary: Field::Unset,
        }
    }

    fn unit_path(&self, ctx: &Context) -> Result<PathBuf> {
        ctx.path_for(Path::new(UNIT_DIR).join(&self.name))
    }

    fn wants_link(&self, ctx: &Context, definition: &str) -> Result<PathBuf> {
        let target = systemd::wanted_by(definition);
        ctx.path_for(
            Path::new(UNIT_DIR)
                .join(format!("{target}.wants"))
                .join(&self.name),
        )
    }
}

impl Task for Service {
    const KIND: &'static str = "Service";

    fn name(&self) -> String {
        self.name.clone()
    }

    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
        Self {
            name: expected.name.clone(),
            definition: differ.value(
                "definition",
                actual.map(|a| &a.definition),
                &expected.definition,
            ),
            enabled: differ.value("enabled", actual.map(|a| &a.enabled), &expected.enabled),
            environment_file: differ.reference(
                "environment_file",
                actual.map(|a| &a.environment_file),
                &expected.environment_file,
            ),
            binary: differ.reference("binary", actual.map(|a| &a.binary), &expected.binary),
        }
    }

    fn find(&self, ctx: &Context) -> Result<Option<Self>> {
        let unit = self.unit_path(ctx)?;
        let definition = match fs::read_to_string(&unit) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::lookup(
                    anyhow::Error::new(e).context(format!("reading {}", unit.display())),
                ));
            }
        };

        let link = self.wants_link(ctx, &definition)?;
        let enabled = link.symlink_metadata().is_ok();

        Ok(Some(Self {
            name: self.name.clone(),
            definition: Field::Set(definition),
            enabled: Field::Set(enabled),
            environment_file: self.environment_file.clone(),
            binary: self.binary.clone(),
        }))
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        if actual.is_none() && expected.definition.is_unset() {
            return Err(Error::RequiredField { field: "definition" });
        }
        Ok(())
    }

    fn render(
        ctx: &Context,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let unit = expected.unit_path(ctx)?;

        if let Some(definition) = changes.definition.get() {
            if let Some(dir) = unit.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))
                    .map_err(Error::Render)?;
            }
            fs::write(&unit, definition)
                .with_context(|| format!("writing {}", unit.display()))
                .map_err(Error::Render)?;
            log::info!("Wrote unit {}", expected.name);
        }

        let definition = fs::read_to_string(&unit)
            .with_context(|| format!("reading {}", unit.display()))
            .map_err(Error::Render)?;

        if let Some(enabled) = changes.enabled.get() {
            let link = expected.wants_link(ctx, &definition)?;
            set_enabled(&link, &unit, *enabled).map_err(Error::Render)?;
        }

        if ctx.containerized() {
            log::info!("Running containerized, not reloading {}", expected.name);
            return Ok(());
        }

        systemctl(&["daemon-reload"]).map_err(Error::Render)?;
        let running = expected.enabled.get().copied().unwrap_or(true);
        if running && (actual.is_none() || changes.definition.is_set()) {
            systemctl(&["restart", &expected.name]).map_err(Error::Render)?;
        }
        Ok(())
    }
}

fn set_enabled(link: &Path, unit: &Path, enabled: bool) -> anyhow::Result<()> {
    if enabled {
        if let Some(dir) = link.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        if link.symlink_metadata().is_err() {
            std::os::unix::fs::symlink(unit, link)
                .with_context(|| format!("linking {}", link.display()))?;
        }
    } else if link.symlink_metadata().is_ok() {
        fs::remove_file(link).with_context(|| format!("removing {}", link.display()))?;
    }
    Ok(())
}

fn systemctl(args: &[&str]) -> anyhow::Result<()> {
    log::debug!("systemctl {}", args.join(" "));
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .context("Failed to run systemctl")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("systemctl {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::File;

    fn context(root: &Path) -> Context {
        Context::builder().root(root).containerized(true).build()
    }

    const UNIT: &str = "[Unit]\nDescription=Example\n\n[Install]\nWantedBy=multi-user.target\n";

    #[test]
    fn test_install_and_enable() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let service = Service::new("example.service", UNIT);

        assert_eq!(service.find(&ctx).unwrap(), None);
        let changes = Changes::compute(None, &service);
        Service::check_changes(None, &service, &changes).unwrap();
        Service::render(&ctx, None, &service, &changes).unwrap();

        let unit = root.path().join("etc/systemd/system/example.service");
        assert_eq!(fs::read_to_string(&unit).unwrap(), UNIT);
        let link = root
            .path()
            .join("etc/systemd/system/multi-user.target.wants/example.service");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());

        let actual = service.find(&ctx).unwrap();
        assert!(Changes::compute(actual.as_ref(), &service).is_empty());
    }

    #[test]
    fn test_disable_removes_link() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let service = Service::new("example.service", UNIT);
        let changes = Changes::compute(None, &service);
        Service::render(&ctx, None, &service, &changes).unwrap();

        let mut disabled = service.clone();
        disabled.enabled = Field::Set(false);
        let actual = disabled.find(&ctx).unwrap();
        let changes = Changes::compute(actual.as_ref(), &disabled);
        assert_eq!(changes.fields(), ["enabled"]);
        Service::render(&ctx, actual.as_ref(), &disabled, &changes).unwrap();

        assert_eq!(disabled.find(&ctx).unwrap().unwrap().enabled, Field::Set(false));
    }

    #[test]
    fn test_references_become_dependencies() {
        let mut service = Service::new("protokube.service", UNIT);
        service.environment_file = Field::Set(TaskRef::to::<File>("/etc/sysconfig/protokube"));
        service.binary = Field::Set(TaskRef::to::<File>("/opt/kops/bin/protokube"));
        let refs: Vec<String> = converge::references_of(&service)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            refs,
            ["File//etc/sysconfig/protokube", "File//opt/kops/bin/protokube"]
        );
    }
}
