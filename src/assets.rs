//! Local asset store: binaries downloaded ahead of provisioning

use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to scan asset directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("no asset matches {pattern}")]
    NotFound { pattern: String },

    #[error("found multiple assets matching {pattern}: {}", .names.join(", "))]
    Ambiguous { pattern: String, names: Vec<String> },
}

/// A file in the asset store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct Assets {
    assets: Vec<Asset>,
}

impl Assets {
    /// Index every regular file under `dir`; a missing directory is empty
    pub fn scan(dir: &Path) -> Result<Self, AssetError> {
        if !dir.exists() {
            log::debug!("Asset directory {} does not exist", dir.display());
            return Ok(Self::default());
        }

        let mut assets = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|source| AssetError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() {
                assets.push(Asset {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path().to_path_buf(),
                });
            }
        }
        log::debug!("Found {} assets in {}", assets.len(), dir.display());
        Ok(Self { assets })
    }

    pub fn from_assets(assets: Vec<Asset>) -> Self {
        Self { assets }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// The single asset whose file name matches `pattern`
    pub fn find_match(&self, pattern: &Regex) -> Result<&Asset, AssetError> {
        let matches: Vec<&Asset> = self
            .assets
            .iter()
            .filter(|asset| pattern.is_match(&asset.name))
            .collect();
        match matches.as_slice() {
            [asset] => Ok(asset),
            [] => Err(AssetError::NotFound {
                pattern: pattern.to_string(),
            }),
            many => Err(AssetError::Ambiguous {
                pattern: pattern.to_string(),
                names: many.iter().map(|a| a.path.display().to_string()).collect(),
            }),
        }
    }
}
