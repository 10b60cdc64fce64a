//! Typed app registry over the Compose manifest
//!
//! The manifest is the durable store; this wrapper loads it into typed
//! records, enforces the invariants text scans could not (unique name,
//! unique safe-name, unique external port), and serializes changes back.
//! Lookups are exact keyed lookups, so names that are prefixes of each
//! other ("foo" vs "foobar") never collide.

use anyhow::{Context, Result};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::app::AppRecord;
use crate::config::PathsConfig;
use crate::manifest::{Manifest, Service};
use crate::ports;

/// Invariant violations surfaced as typed errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("App '{0}' is already registered")]
    DuplicateName(String),

    #[error("Container name '{0}' is already taken by app '{1}'")]
    DuplicateSafeName(String, String),

    #[error("Port {0} is already published by service '{1}'")]
    DuplicatePort(u16, String),

    #[error("App '{0}' is not registered")]
    NotFound(String),

    #[error("Manifest is inconsistent: {0}")]
    Corrupt(String),
}

/// Load-mutate-commit store for app records
pub struct Registry {
    manifest: Manifest,
    manifest_path: PathBuf,
    paths: PathsConfig,
}

impl Registry {
    /// Load the registry from the manifest on disk
    pub fn load(paths: &PathsConfig) -> Result<Self> {
        let manifest_path = paths.compose_path();
        let manifest = Manifest::load(&manifest_path)?;
        debug!(
            path = %manifest_path.display(),
            services = manifest.services.len(),
            "Registry loaded"
        );
        Ok(Self {
            manifest,
            manifest_path,
            paths: paths.clone(),
        })
    }

    /// All records this tool manages, in stanza order
    pub fn records(&self) -> Result<Vec<AppRecord>> {
        self.manifest.records()
    }

    /// Look up one record by exact app name
    pub fn get(&self, name: &str) -> Result<AppRecord> {
        self.records()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
            .map_err(Into::into)
    }

    /// Next free external port, skipping anything any stanza publishes
    pub fn allocate_port(&self, base: u16) -> Result<u16> {
        let mut candidate = ports::next_external_port(&self.manifest, base)?;
        let taken = self.manifest.host_ports();
        while taken.contains(&candidate) {
            candidate = candidate
                .checked_add(1)
                .context("Host port space exhausted")?;
        }
        Ok(candidate)
    }

    /// Register a new app, enforcing uniqueness invariants
    pub fn register(&mut self, record: &AppRecord) -> Result<(), RegistryError> {
        let existing = self.typed_records()?;

        if existing.iter().any(|r| r.name == record.name) {
            return Err(RegistryError::DuplicateName(record.name.clone()));
        }
        if let Some(owner) = existing.iter().find(|r| r.safe_name == record.safe_name) {
            return Err(RegistryError::DuplicateSafeName(
                record.safe_name.clone(),
                owner.name.clone(),
            ));
        }
        if let Some((name, _)) = self
            .manifest
            .services
            .iter()
            .find(|(_, s)| s.host_port() == Some(record.port))
        {
            return Err(RegistryError::DuplicatePort(record.port, name.clone()));
        }

        let service = Service::for_app(record, &self.paths);
        self.manifest.insert(&record.safe_name, service);
        Ok(())
    }

    /// Deregister an app by exact name, returning its record
    pub fn deregister(&mut self, name: &str) -> Result<AppRecord, RegistryError> {
        let record = self
            .typed_records()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        self.manifest.remove(&record.safe_name);
        Ok(record)
    }

    /// Records, with load failures surfaced as a typed error rather than
    /// an empty registry (a broken stanza must not pass the duplicate checks)
    fn typed_records(&self) -> Result<Vec<AppRecord>, RegistryError> {
        self.manifest
            .records()
            .map_err(|e| RegistryError::Corrupt(format!("{:#}", e)))
    }

    /// Serialize the manifest back to disk
    pub fn commit(&self) -> Result<()> {
        self.manifest.save(&self.manifest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RouteKind;

    fn test_paths(root: &std::path::Path) -> PathsConfig {
        PathsConfig {
            compose_file: root.join("docker-compose.yml").display().to_string(),
            sites_dir: root.join("sites").display().to_string(),
            site_file: "apps.conf".to_string(),
            apps_root: root.join("apps").display().to_string(),
            env_dir: root.join("env").display().to_string(),
            lock_file: root.join("berth.lock").display().to_string(),
            backup_dir: root.join("backups").display().to_string(),
        }
    }

    fn record(name: &str, port: u16) -> AppRecord {
        AppRecord::new(name, port, RouteKind::Path).unwrap()
    }

    #[test]
    fn test_prefix_names_register_with_sequential_ports() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());

        let mut registry = Registry::load(&paths).unwrap();
        let port = registry.allocate_port(8100).unwrap();
        assert_eq!(port, 8100);
        registry.register(&record("foo", port)).unwrap();
        registry.commit().unwrap();

        let mut registry = Registry::load(&paths).unwrap();
        let port = registry.allocate_port(8100).unwrap();
        assert_eq!(port, 8101);
        registry.register(&record("foobar", port)).unwrap();
        registry.commit().unwrap();

        let registry = Registry::load(&paths).unwrap();
        let records = registry.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(registry.get("foo").unwrap().port, 8100);
        assert_eq!(registry.get("foobar").unwrap().port, 8101);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&test_paths(dir.path())).unwrap();

        registry.register(&record("blog", 8100)).unwrap();
        let err = registry.register(&record("blog", 8101)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[test]
    fn test_colliding_safe_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&test_paths(dir.path())).unwrap();

        // "my-app" and "my_app" sanitize to the same container name
        registry.register(&record("my-app", 8100)).unwrap();
        let err = registry.register(&record("my_app", 8101)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSafeName(_, _)));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&test_paths(dir.path())).unwrap();

        registry.register(&record("one", 8100)).unwrap();
        let err = registry.register(&record("two", 8100)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePort(8100, _)));
    }

    #[test]
    fn test_deregister_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&test_paths(dir.path())).unwrap();

        registry.register(&record("foo", 8100)).unwrap();
        registry.register(&record("foobar", 8101)).unwrap();

        let removed = registry.deregister("foo").unwrap();
        assert_eq!(removed.port, 8100);
        assert!(registry.get("foobar").is_ok());
        assert!(matches!(
            registry.deregister("foo").unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }

    #[test]
    fn test_broken_managed_stanza_surfaces_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        // Managed stanza with no pinned host port: must not be treated as
        // an empty registry by mutation paths
        std::fs::write(
            paths.compose_path(),
            r#"
services:
  broken:
    x-berth:
      name: broken
      route: path
"#,
        )
        .unwrap();

        let mut registry = Registry::load(&paths).unwrap();
        assert!(matches!(
            registry.register(&record("other", 8100)).unwrap_err(),
            RegistryError::Corrupt(_)
        ));
        assert!(registry.manifest.contains("broken"));
        assert!(matches!(
            registry.deregister("broken").unwrap_err(),
            RegistryError::Corrupt(_)
        ));
    }

    #[test]
    fn test_allocation_skips_foreign_ports() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        std::fs::write(
            paths.compose_path(),
            r#"
services:
  managed:
    ports: ["8100:8000"]
    x-berth:
      name: managed
      route: path
  legacy:
    image: nginx
    ports: ["8101:80"]
"#,
        )
        .unwrap();

        let registry = Registry::load(&paths).unwrap();
        // max internal mapping is 8100, but 8101 is held by the foreign stanza
        assert_eq!(registry.allocate_port(8100).unwrap(), 8102);
    }
}
