//! Directory-backed secret store: one file per secret

use anyhow::Context;
use converge::SecretStore;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DirSecrets {
    dir: PathBuf,
}

impl DirSecrets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretStore for DirSecrets {
    fn secret(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            anyhow::bail!("invalid secret name {name:?}");
        }
        let path = self.dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read secret {}", path.display())),
        }
    }
}
