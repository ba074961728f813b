//! Config path resolution for nodeup
//!
//! # Resolution Priority
//!
//! 1. `--config` on the command line
//! 2. `NODEUP_CONFIG` environment variable
//! 3. `/etc/nodeup/config.toml`

use std::path::PathBuf;

/// Environment variable for config file override
pub const ENV_CONFIG: &str = "NODEUP_CONFIG";

/// Default config file location
pub const DEFAULT_CONFIG: &str = "/etc/nodeup/config.toml";

/// Resolve the node config file path
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        log::debug!("Using config from command line: {}", path.display());
        return path;
    }

    if let Ok(path) = std::env::var(ENV_CONFIG)
        && !path.is_empty()
    {
        log::debug!("Using config from {ENV_CONFIG}: {path}");
        return PathBuf::from(path);
    }

    PathBuf::from(DEFAULT_CONFIG)
}
