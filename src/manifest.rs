//! Typed model of the Compose manifest
//!
//! The manifest holds one service stanza per registered app. Each stanza
//! carries the fields the tool owns plus an `x-berth` extension block, which
//! Compose ignores by specification, so app records round-trip losslessly
//! through the file. Keys the tool does not own (hand-added services,
//! networks, volumes, stray stanza fields) are preserved structurally across
//! a load/save cycle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::app::{AppRecord, RouteKind};
use crate::config::PathsConfig;

/// Port every managed container listens on inside its network namespace
pub const INTERNAL_PORT: u16 = 8000;

/// The whole Compose file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    /// Top-level keys we do not own (networks, volumes, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// One service stanza
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<EnvFileSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,

    /// Record metadata, ignored by Compose
    #[serde(rename = "x-berth", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ServiceMeta>,

    /// Stanza fields we do not own
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// The `build:` key: a bare context path, or the mapping form with
/// `context:`/`dockerfile:` that hand-written stanzas often use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Context(String),
    Other(serde_yaml::Value),
}

/// The `env_file:` key: one path, or a list of paths/mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileSpec {
    Single(String),
    Other(serde_yaml::Value),
}

/// A single entry under `ports:`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortMapping {
    /// Short syntax, e.g. "8101:8000" or "127.0.0.1:8101:8000"
    Short(String),
    /// Anything else Compose accepts (long syntax, bare container port)
    Other(serde_yaml::Value),
}

impl PortMapping {
    pub fn publish(host: u16, container: u16) -> Self {
        PortMapping::Short(format!("{}:{}", host, container))
    }

    /// Host and container ports, when both are pinned
    pub fn pinned_pair(&self) -> Option<(u16, u16)> {
        match self {
            PortMapping::Short(s) => parse_short_mapping(s),
            PortMapping::Other(value) => {
                let map = value.as_mapping()?;
                let host = port_value(map.get("published")?)?;
                let container = port_value(map.get("target")?)?;
                Some((host, container))
            }
        }
    }

    /// The host-side port of this mapping, when one is pinned
    pub fn host_port(&self) -> Option<u16> {
        self.pinned_pair().map(|(host, _)| host)
    }
}

fn port_value(value: &serde_yaml::Value) -> Option<u16> {
    match value {
        serde_yaml::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_yaml::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Ports of a short-syntax mapping: `[ip:]host:container[/protocol]`
fn parse_short_mapping(s: &str) -> Option<(u16, u16)> {
    let without_proto = s.split('/').next().unwrap_or(s);
    let parts: Vec<&str> = without_proto.split(':').collect();
    let (host, container) = match parts.as_slice() {
        [_container] => return None,
        [host, container] => (host, container),
        [_ip, host, container] => (host, container),
        _ => return None,
    };
    Some((host.parse().ok()?, container.parse().ok()?))
}

/// Container-level health check Compose runs for us
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Absent when the stanza only disables an image-level check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<HealthTest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Compose accepts both exec-array and shell-string forms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthTest {
    Command(Vec<String>),
    Shell(String),
}

impl Healthcheck {
    /// curl against the app's own health endpoint inside the container
    pub fn curl(health_path: &str) -> Self {
        Self {
            test: Some(HealthTest::Command(vec![
                "CMD".to_string(),
                "curl".to_string(),
                "-f".to_string(),
                format!("http://localhost:{}{}", INTERNAL_PORT, health_path),
            ])),
            interval: Some("30s".to_string()),
            timeout: Some("5s".to_string()),
            retries: Some(3),
            start_period: Some("10s".to_string()),
            extra: BTreeMap::new(),
        }
    }
}

/// Record fields serialized into the stanza's `x-berth` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMeta {
    /// User-chosen app name (the stanza key is the safe-name)
    pub name: String,

    pub route: RouteKind,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

fn default_health_path() -> String {
    crate::app::DEFAULT_HEALTH_PATH.to_string()
}

impl Service {
    /// Build the stanza for a registered app
    pub fn for_app(record: &AppRecord, paths: &PathsConfig) -> Self {
        Self {
            build: Some(BuildSpec::Context(
                paths.app_dir(&record.safe_name).display().to_string(),
            )),
            container_name: Some(record.safe_name.clone()),
            ports: vec![PortMapping::publish(record.port, INTERNAL_PORT)],
            env_file: Some(EnvFileSpec::Single(
                paths.env_file(&record.safe_name).display().to_string(),
            )),
            restart: Some("unless-stopped".to_string()),
            healthcheck: Some(Healthcheck::curl(&record.health_path)),
            meta: Some(ServiceMeta {
                name: record.name.clone(),
                route: record.route,
                health_path: record.health_path.clone(),
                repo: record.repo_url.clone(),
            }),
            extra: BTreeMap::new(),
        }
    }

    /// The pinned host port of this stanza, if any
    pub fn host_port(&self) -> Option<u16> {
        self.ports.iter().find_map(|p| p.host_port())
    }
}

impl Manifest {
    /// Load the manifest; a missing file is an empty manifest
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read compose manifest {}", path.display()))?;
        let manifest: Manifest = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse compose manifest {}", path.display()))?;
        Ok(manifest)
    }

    /// Serialize and write the manifest, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize compose manifest")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write compose manifest {}", path.display()))?;
        Ok(())
    }

    pub fn contains(&self, safe_name: &str) -> bool {
        self.services.contains_key(safe_name)
    }

    pub fn insert(&mut self, safe_name: &str, service: Service) {
        self.services.insert(safe_name.to_string(), service);
    }

    pub fn remove(&mut self, safe_name: &str) -> Option<Service> {
        self.services.remove(safe_name)
    }

    /// All host ports pinned anywhere in the manifest, managed or not
    pub fn host_ports(&self) -> Vec<u16> {
        self.services
            .values()
            .flat_map(|s| s.ports.iter())
            .filter_map(|p| p.host_port())
            .collect()
    }

    /// Host ports published to the managed internal port
    pub fn published_to_internal(&self) -> Vec<u16> {
        self.services
            .values()
            .flat_map(|s| s.ports.iter())
            .filter_map(|p| p.pinned_pair())
            .filter(|(_, container)| *container == INTERNAL_PORT)
            .map(|(host, _)| host)
            .collect()
    }

    /// Reconstruct app records from the stanzas this tool manages
    pub fn records(&self) -> Result<Vec<AppRecord>> {
        let mut records = Vec::new();
        for (safe_name, service) in &self.services {
            let Some(meta) = &service.meta else {
                continue;
            };
            let port = service.host_port().with_context(|| {
                format!("Service '{}' is managed but has no pinned host port", safe_name)
            })?;
            records.push(AppRecord {
                name: meta.name.clone(),
                safe_name: safe_name.clone(),
                port,
                route: meta.route,
                health_path: meta.health_path.clone(),
                repo_url: meta.repo.clone(),
            });
        }
        Ok(records)
    }
}
