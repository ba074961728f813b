use anyhow::{Context, Result, bail};
use converge::{Lifecycle, LifecycleOverrides};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Node Config Schema
// ============================================================================

/// Everything nodeup needs to know about the node it runs on
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Filesystem root that host paths are written under
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Running inside a container: do not talk to host systemd
    #[serde(default)]
    pub containerized: bool,

    /// Base of the managed object store; defaults to `<root>/srv/config`
    #[serde(default)]
    pub config_base: Option<PathBuf>,

    /// Directory holding downloaded binaries
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Directory holding one file per secret
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,

    /// Number of tasks reconciled concurrently
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    pub cluster: ClusterConfig,

    #[serde(default)]
    pub protokube: ProtokubeConfig,

    /// Lifecycle overrides keyed by task kind or full task key
    #[serde(default)]
    pub lifecycles: BTreeMap<String, Lifecycle>,

    #[serde(default)]
    pub files: Vec<FileConfig>,

    #[serde(default)]
    pub managed_files: Vec<ManagedFileConfig>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("/var/cache/nodeup/assets")
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/etc/nodeup/secrets")
}

fn default_jobs() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,

    pub kubernetes_version: String,

    #[serde(default)]
    pub cloud_provider: Option<String>,

    /// Internal API hostname; a `.k8s.local` suffix means gossip DNS
    pub master_internal_name: String,

    #[serde(default)]
    pub dns_zone: Option<String>,

    #[serde(default)]
    pub is_master: bool,

    /// Node name as registered in Kubernetes; defaults to the hostname
    #[serde(default)]
    pub node_name: Option<String>,

    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default)]
    pub gossip: Option<GossipConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GossipConfig {
    pub protocol: Option<String>,
    pub listen: Option<String>,
    pub secret: Option<String>,
    #[serde(default)]
    pub secondary: Option<Box<GossipConfig>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtokubeConfig {
    /// Extra variables written to the protokube environment file
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Whether protokube manages etcd itself
    #[serde(default)]
    pub manage_etcd: bool,
}

// ============================================================================
// Declared Files
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

/// A file or directory declared directly in the config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: String,

    #[serde(default, rename = "type")]
    pub kind: FileKind,

    /// Inline contents
    #[serde(default)]
    pub contents: Option<String>,

    /// Name of a secret to use as contents
    #[serde(default)]
    pub secret: Option<String>,

    /// Octal mode, e.g. "0644"
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
}

/// An object in the managed config store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedFileConfig {
    pub name: String,

    pub location: String,

    #[serde(default)]
    pub contents: Option<String>,

    #[serde(default)]
    pub base: Option<String>,

    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
}

impl NodeConfig {
    /// Load and validate the node config
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.is_empty() {
            bail!("cluster.name must not be empty");
        }
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        for file in &self.files {
            if !file.path.starts_with('/') {
                bail!("file path must be absolute: {}", file.path);
            }
            if file.contents.is_some() && file.secret.is_some() {
                bail!("file {} sets both contents and secret", file.path);
            }
            if let Some(mode) = &file.mode {
                parse_mode(mode).with_context(|| format!("Invalid mode for {}", file.path))?;
            }
        }
        Ok(())
    }

    pub fn lifecycle_overrides(&self) -> LifecycleOverrides {
        self.lifecycles
            .iter()
            .map(|(target, lifecycle)| (target.clone(), *lifecycle))
            .collect()
    }
}

/// Parse an octal file mode such as `"0755"`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    let value =
        u32::from_str_radix(digits, 8).with_context(|| format!("not an octal mode: {mode:?}"))?;
    if value > 0o7777 {
        bail!("mode out of range: {mode:?}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
root = "/rootfs"
jobs = 2

[cluster]
name = "dev.k8s.local"
kubernetes_version = "1.19.3"
cloud_provider = "aws"
master_internal_name = "api.internal.dev.k8s.local"
is_master = true
channels = ["s3://state/dev/addons/bootstrap-channel.yaml"]

[protokube.environment]
AWS_REGION = "eu-west-1"

[lifecycles]
ManagedFile = "ExistsAndWarnIfChanges"

[[files]]
path = "/etc/motd"
contents = "hello"
mode = "0644"

[[files]]
path = "/var/lib/extra"
type = "directory"
lifecycle = "WarnOnly"

[[managed_files]]
name = "cluster-spec"
location = "cluster.spec"
contents = "spec: {}"
"#;

    #[test]
    fn test_parse_example_config() {
        let config: NodeConfig = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.root, PathBuf::from("/rootfs"));
        assert_eq!(config.jobs, 2);
        assert!(config.cluster.is_master);
        assert_eq!(config.protokube.environment["AWS_REGION"], "eu-west-1");
        assert_eq!(
            config.lifecycles["ManagedFile"],
            Lifecycle::ExistsAndWarnIfChanges
        );
        assert_eq!(config.files[1].kind, FileKind::Directory);
        assert_eq!(config.files[1].lifecycle, Some(Lifecycle::WarnOnly));
        assert_eq!(config.managed_files[0].location, "cluster.spec");
        assert!(!config.lifecycle_overrides().is_empty());
    }

    #[test]
    fn test_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
[cluster]
name = "c"
kubernetes_version = "1.18.0"
master_internal_name = "api.internal.c"
"#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/"));
        assert_eq!(config.jobs, 4);
        assert!(!config.containerized);
        assert!(config.files.is_empty());
    }

    #[test]
    fn test_validate_rejects_relative_file_paths() {
        let mut config: NodeConfig = toml::from_str(EXAMPLE).unwrap();
        config.files[0].path = "etc/motd".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, EXAMPLE).unwrap();
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.cluster.name, "dev.k8s.local");

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(NodeConfig::load(&path).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0755").unwrap(), 0o755);
        assert_eq!(parse_mode("400").unwrap(), 0o400);
        assert_eq!(parse_mode("0o600").unwrap(), 0o600);
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
