//! Model builders: turn the node config into expected-state tasks

mod files;
mod protokube;

pub use files::FilesBuilder;
pub use protokube::ProtokubeBuilder;

use anyhow::{Context, Result, bail};
use converge::TaskGraph;

use crate::assets::Assets;
use crate::config::NodeConfig;

/// Everything the builders read; shared by all of them
pub struct NodeModel<'a> {
    pub config: &'a NodeConfig,
    pub assets: &'a Assets,
}

impl NodeModel<'_> {
    pub fn is_master(&self) -> bool {
        self.config.cluster.is_master
    }

    /// Gossip DNS is implied by a `.k8s.local` internal API name
    pub fn use_gossip(&self) -> bool {
        is_gossip_hostname(&self.config.cluster.master_internal_name)
    }

    /// Kubernetes (major, minor) version
    pub fn kubernetes_version(&self) -> Result<(u32, u32)> {
        parse_kubernetes_version(&self.config.cluster.kubernetes_version)
    }

    /// Node name as registered in Kubernetes
    pub fn node_name(&self) -> Result<String> {
        if let Some(name) = &self.config.cluster.node_name {
            return Ok(name.clone());
        }
        let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .or_else(|_| std::fs::read_to_string("/etc/hostname"))
            .context("Could not determine hostname; set cluster.node_name")?;
        Ok(hostname.trim().to_string())
    }
}

pub fn is_gossip_hostname(name: &str) -> bool {
    name.trim_end_matches('.').ends_with(".k8s.local")
}

pub fn parse_kubernetes_version(version: &str) -> Result<(u32, u32)> {
    let trimmed = version.trim().trim_start_matches('v');
    let mut parts = trimmed.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        bail!("unable to parse KubernetesVersion {version:?}");
    };
    let major = major
        .parse()
        .with_context(|| format!("unable to parse KubernetesVersion {version:?}"))?;
    let minor = minor
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default()
        .parse()
        .with_context(|| format!("unable to parse KubernetesVersion {version:?}"))?;
    Ok((major, minor))
}

/// Run every builder for this node into a fresh graph
pub fn build_graph(model: &NodeModel<'_>) -> Result<TaskGraph> {
    let mut graph = TaskGraph::with_overrides(model.config.lifecycle_overrides());
    graph.run_builder(&ProtokubeBuilder { model })?;
    graph.run_builder(&FilesBuilder { model })?;
    log::info!("Model built {} tasks", graph.len());
    Ok(graph)
}
