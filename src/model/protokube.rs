//! Protokube: binaries, kubeconfig, environment file and systemd unit

use anyhow::Result;
use converge::{ModelBuilder, TaskGraph, TaskRef};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use super::NodeModel;
use crate::flags::FlagBuilder;
use crate::systemd::Manifest;
use crate::tasks::{Contents, File, Service};

const BIN_DIR: &str = "/opt/kops/bin";
const KUBECONFIG_PATH: &str = "/var/lib/kops/kubeconfig";
const ENV_FILE: &str = "/etc/sysconfig/protokube";
const KUBECONFIG_SECRET: &str = "kubeconfig";

pub struct ProtokubeBuilder<'a> {
    pub model: &'a NodeModel<'a>,
}

impl ModelBuilder for ProtokubeBuilder<'_> {
    fn name(&self) -> &str {
        "protokube"
    }

    fn build(&self, graph: &mut TaskGraph) -> Result<()> {
        let model = self.model;
        if !model.is_master() && !model.use_gossip() {
            log::debug!("Skipping protokube on a non-master node without gossip");
            return Ok(());
        }

        graph.add_task(File::directory(BIN_DIR).with_mode(0o755))?;
        let protokube = self.binary(graph, "protokube$")?;
        self.binary(graph, "channels$")?;

        if model.is_master() {
            graph.add_task(
                File::new(KUBECONFIG_PATH, Contents::Secret(KUBECONFIG_SECRET.to_string()))
                    .with_mode(0o400),
            )?;
        }

        graph.add_task(File::new(ENV_FILE, Contents::text(self.env_file())))?;

        let mut service = Service::new("protokube.service", self.unit(&protokube)?);
        service.environment_file = TaskRef::to::<File>(ENV_FILE).into();
        service.binary = TaskRef::to::<File>(protokube).into();
        graph.add_task(service)?;

        Ok(())
    }
}

impl ProtokubeBuilder<'_> {
    /// Install the single asset matching `pattern` into the bin directory
    fn binary(&self, graph: &mut TaskGraph, pattern: &str) -> Result<String> {
        let asset = self.model.assets.find_match(&Regex::new(pattern)?)?;
        let path = Path::new(BIN_DIR).join(&asset.name).display().to_string();
        graph.add_task(
            File::new(&path, Contents::Asset(asset.path.clone()))
                .with_mode(0o755)
                .with_parent(TaskRef::to::<File>(BIN_DIR)),
        )?;
        Ok(path)
    }

    /// `KEY=value` lines, sorted by key
    fn env_file(&self) -> String {
        let mut vars: BTreeMap<&str, &str> = self
            .model
            .config
            .protokube
            .environment
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        vars.insert("KUBECONFIG", KUBECONFIG_PATH);

        vars.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
    }

    fn unit(&self, binary: &str) -> Result<String> {
        let flags = self.flags()?;

        let mut manifest = Manifest::new();
        manifest.set("Unit", "Description", "Kubernetes Protokube Service");
        manifest.set("Unit", "Documentation", "https://github.com/kubernetes/kops");
        manifest.set("Service", "ExecStart", format!("{binary} {flags}"));
        manifest.set("Service", "EnvironmentFile", ENV_FILE);
        manifest.set("Service", "Restart", "always");
        manifest.set("Service", "RestartSec", "3s");
        manifest.set("Service", "StartLimitInterval", "0");
        manifest.set("Install", "WantedBy", "multi-user.target");

        let rendered = manifest.render();
        log::trace!("Built service manifest protokube.service\n{rendered}");
        Ok(rendered)
    }

    fn flags(&self) -> Result<String> {
        let model = self.model;
        let cluster = &model.config.cluster;
        let (major, minor) = model.kubernetes_version()?;

        let mut dns_provider: Option<String> = None;
        let mut internal_suffix: Option<String> = None;
        let mut gossip = FlagBuilder::new();

        if model.use_gossip() {
            log::warn!(
                "MasterInternalName {:?} implies gossip DNS",
                cluster.master_internal_name
            );
            dns_provider = Some("gossip".to_string());
            if let Some(g) = &cluster.gossip {
                gossip = gossip
                    .value("gossip-protocol", g.protocol.as_deref())
                    .value("gossip-listen", g.listen.as_deref())
                    .value("gossip-secret", g.secret.as_deref());
                if let Some(s) = &g.secondary {
                    let protocol = s.protocol.as_deref().unwrap_or("");
                    gossip = gossip
                        .value("gossip-protocol-secondary", Some(protocol))
                        .value("gossip-listen-secondary", s.listen.as_deref())
                        .value("gossip-secret-secondary", s.secret.as_deref());
                }
            }
            let suffix = cluster.master_internal_name.trim_start_matches("api.");
            internal_suffix = Some(suffix.to_string());
        }

        if let Some(cloud) = &cluster.cloud_provider
            && dns_provider.is_none()
        {
            dns_provider = match cloud.as_str() {
                "aws" => Some("aws-route53".to_string()),
                "digitalocean" => Some("digitalocean".to_string()),
                "gce" => Some("google-clouddns".to_string()),
                other => {
                    log::warn!("Unknown cloudprovider {other:?}; won't set DNS provider");
                    None
                }
            };
        }

        let internal_suffix =
            internal_suffix.unwrap_or_else(|| format!(".internal.{}", cluster.name));

        let zone = match cluster.dns_zone.as_deref() {
            Some(zone) if zone.contains('.') => vec![zone.to_string()],
            Some(zone) if !zone.is_empty() => vec![format!("*/{zone}")],
            _ => {
                log::warn!("DNSZone not specified; protokube won't be able to update DNS");
                Vec::new()
            }
        };

        let node_labels = major == 1 && minor >= 16;
        let node_name = if node_labels {
            Some(model.node_name()?)
        } else {
            None
        };

        let mut flags = FlagBuilder::new()
            .list("channels", &cluster.channels)
            .value("cloud", cluster.cloud_provider.as_deref())
            .value("containerized", Some(false))
            .value("dns", dns_provider)
            .value("dns-internal-suffix", Some(internal_suffix))
            .value("initialize-rbac", Some(true))
            .value("v", Some(4))
            .value("master", Some(model.is_master()))
            .switch("manage-etcd", model.config.protokube.manage_etcd)
            .list("zone", &zone)
            .switch("bootstrap-master-node-labels", node_labels)
            .value("node-name", node_name)
            .build();

        let gossip = gossip.build();
        if !gossip.is_empty() {
            flags = format!("{flags} {gossip}");
        }
        Ok(flags)
    }
}
