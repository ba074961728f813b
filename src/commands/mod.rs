pub mod apply;
pub mod diff;
pub mod graph;

use anyhow::{Context as AnyhowContext, Result};
use converge::{CancelToken, Context, ExecutionPlan};
use std::path::PathBuf;

use crate::assets::Assets;
use crate::config::NodeConfig;
use crate::model::{NodeModel, build_graph};
use crate::paths;
use crate::secrets::DirSecrets;

/// Everything a command needs before it can execute the plan
pub struct Loaded {
    pub config: NodeConfig,
    pub plan: ExecutionPlan,
}

impl Loaded {
    /// Load the config, run the builders and validate the graph
    pub fn load(config: Option<PathBuf>) -> Result<Self> {
        let path = paths::config_path(config);
        log::info!("Loading config from {}", path.display());
        let config = NodeConfig::load(&path)?;

        let assets = Assets::scan(&config.assets_dir)
            .with_context(|| format!("Scanning assets in {}", config.assets_dir.display()))?;
        log::debug!("Found {} assets", assets.len());

        let model = NodeModel {
            config: &config,
            assets: &assets,
        };
        let plan = build_graph(&model)?.build()?;
        Ok(Self { config, plan })
    }

    /// Reconciliation context rooted where the config says
    pub fn context(&self) -> Context {
        let config = &self.config;
        let mut builder = Context::builder()
            .root(&config.root)
            .containerized(config.containerized)
            .cluster_name(&config.cluster.name)
            .secrets(DirSecrets::new(&config.secrets_dir));
        if let Some(base) = &config.config_base {
            builder = builder.config_base(base);
        }
        builder.build()
    }

    pub fn jobs(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.jobs).max(1)
    }
}

/// Token that flips on the first Ctrl-C
pub fn cancel_on_interrupt() -> CancelToken {
    let token = CancelToken::new();
    let handler = token.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!("Interrupted, letting running tasks finish");
        handler.cancel();
    }) {
        log::warn!("Could not install Ctrl-C handler: {err}");
    }
    token
}
