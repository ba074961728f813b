//! Run context and provider traits
//!
//! The context is built once per run and shared read-only by every task
//! invocation. Provider traits keep the engine free of any particular
//! secret store or terminal UI.

use crate::error::{Error, Result};
use crate::task::TaskKey;
use crate::types::TaskOutcome;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Source of secret material (keys, tokens, kubeconfigs)
pub trait SecretStore: Send + Sync {
    /// Look up a secret; `Ok(None)` when it does not exist
    fn secret(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Store with no secrets at all
pub struct NoSecrets;

impl SecretStore for NoSecrets {
    fn secret(&self, _name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// In-memory secret store
#[derive(Debug, Default, Clone)]
pub struct MemorySecrets {
    secrets: BTreeMap<String, Vec<u8>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.secrets.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(name, value);
        self
    }
}

impl SecretStore for MemorySecrets {
    fn secret(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.secrets.get(name).cloned())
    }
}

/// Per-run state shared by every task call
///
/// Holds no per-task mutable state, so it can be handed to any number of
/// workers at once.
#[derive(Clone)]
pub struct Context {
    root: PathBuf,
    containerized: bool,
    config_base: PathBuf,
    cluster_name: String,
    secrets: Arc<dyn SecretStore>,
    target: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Filesystem root that host paths are mapped under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether we run inside a container and cannot reach host services
    pub fn containerized(&self) -> bool {
        self.containerized
    }

    /// Base of the managed object store
    pub fn config_base(&self) -> &Path {
        &self.config_base
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Target environment handle (cloud client, fake, ...) if one was set
    pub fn target<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.target.as_deref().and_then(|t| t.downcast_ref::<T>())
    }

    /// Map an absolute host path under the context root
    pub fn path_for(&self, host_path: impl AsRef<Path>) -> Result<PathBuf> {
        let host_path = host_path.as_ref();
        if !host_path.is_absolute() {
            return Err(Error::lookup(anyhow::anyhow!(
                "path was not absolute: {}",
                host_path.display()
            )));
        }
        let relative: PathBuf = host_path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        Ok(self.root.join(relative))
    }

    /// Get a secret, failing when it does not exist
    pub fn secret(&self, name: &str) -> Result<Vec<u8>> {
        self.secrets
            .secret(name)
            .map_err(Error::Lookup)?
            .ok_or_else(|| Error::lookup(anyhow::anyhow!("secret {name:?} not found")))
    }

    /// Get a secret if it exists
    pub fn find_secret(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.secrets.secret(name).map_err(Error::Lookup)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("containerized", &self.containerized)
            .field("config_base", &self.config_base)
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    root: PathBuf,
    containerized: bool,
    config_base: Option<PathBuf>,
    cluster_name: String,
    secrets: Arc<dyn SecretStore>,
    target: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            containerized: false,
            config_base: None,
            cluster_name: String::new(),
            secrets: Arc::new(NoSecrets),
            target: None,
        }
    }
}

impl ContextBuilder {
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn containerized(mut self, containerized: bool) -> Self {
        self.containerized = containerized;
        self
    }

    pub fn config_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.config_base = Some(base.into());
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn secrets(mut self, secrets: impl SecretStore + 'static) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn target<T: Any + Send + Sync>(mut self, target: T) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Finish the context; the config base defaults to `<root>/srv/config`
    pub fn build(self) -> Context {
        let config_base = self
            .config_base
            .unwrap_or_else(|| self.root.join("srv").join("config"));
        Context {
            root: self.root,
            containerized: self.containerized,
            config_base,
            cluster_name: self.cluster_name,
            secrets: self.secrets,
            target: self.target,
        }
    }
}

/// Shared cancellation flag for a run
///
/// Once cancelled, the scheduler dispatches nothing new; tasks already
/// running are left to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for execution
///
/// All calls happen on the coordinating thread, never on workers.
pub trait ProgressCallback {
    /// Called once before anything is dispatched
    fn on_run_start(&mut self, total: usize);

    /// Called when a task is handed to a worker
    fn on_task_start(&mut self, key: &TaskKey);

    /// Called when a task reaches a final state
    fn on_task_complete(&mut self, key: &TaskKey, outcome: &TaskOutcome);

    /// Called once after the last task
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_task_start(&mut self, _key: &TaskKey) {}
    fn on_task_complete(&mut self, _key: &TaskKey, _outcome: &TaskOutcome) {}
    fn on_run_complete(&mut self) {}
}
