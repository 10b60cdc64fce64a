//! Lifecycle driver stitching the registration workflows together
//!
//! Each workflow is one linear batch run under the registry lock:
//! source → env file → manifest stanza → route → build → start → probe →
//! certificate. Any step's failure aborts with the step's own diagnostics;
//! only certificate issuance is advisory during a deploy.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app::{AppRecord, RouteKind};
use crate::certbot;
use crate::compose::ComposeCli;
use crate::config::Config;
use crate::envfile;
use crate::git::GitCli;
use crate::guard::NginxCli;
use crate::health;
use crate::lock::RegistryLock;
use crate::registry::Registry;
use crate::routes;
use crate::scaffold;

/// External tools located once per invocation
pub struct Toolbox {
    pub compose: ComposeCli,
    pub nginx: NginxCli,
    pub git: GitCli,
}

impl Toolbox {
    pub async fn prepare(config: &Config) -> Result<Self> {
        Ok(Self {
            compose: ComposeCli::find().await?,
            nginx: NginxCli::find()?,
            git: GitCli::find(&config.git).await?,
        })
    }
}

/// Everything `add` needs beyond the config
pub struct AddRequest {
    pub name: String,
    pub kind: RouteKind,
    pub health_path: String,
    pub repo_url: Option<String>,
}

/// Register and deploy a new app end to end
pub async fn add_app(config: &Config, tools: &Toolbox, request: AddRequest) -> Result<AppRecord> {
    let paths = &config.paths;
    let _lock = RegistryLock::acquire(&paths.lock_path())?;

    let mut registry = Registry::load(paths)?;
    let port = registry.allocate_port(config.ports.base)?;

    let record = AppRecord::new(&request.name, port, request.kind)?
        .with_health_path(&request.health_path)
        .with_repo_url(request.repo_url);

    info!(app = %record.name, port, route = %record.route, "Registering app");

    // Source tree
    let app_dir = paths.app_dir(&record.safe_name);
    if let Some(url) = &record.repo_url {
        let outcome = tools.git.sync(url, &app_dir).await?;
        info!(app = %record.name, %outcome, "Source synchronized");
    } else if scaffold::scaffold_app(&app_dir, &record)? {
        info!(app = %record.name, "Starter app scaffolded");
    } else {
        info!(app = %record.name, dir = %app_dir.display(), "Using existing source directory");
    }

    let env_outcome = envfile::ensure_env_file(paths, &record)?;
    info!(app = %record.name, env_file = %env_outcome, "Env file ready");

    // Manifest stanza
    registry.register(&record)?;
    registry.commit()?;

    // Route
    match record.route {
        RouteKind::Path => {
            routes::add_path_route(paths, &config.server, &record, &tools.nginx)?;
        }
        RouteKind::Subdomain => {
            let fqdn = record.fqdn(&config.server.base_domain);
            routes::add_subdomain_route(paths, &record, &fqdn, &tools.nginx)?;
        }
    }
    tools.nginx.reload()?;

    // Container
    let manifest_path = paths.compose_path();
    tools.compose.build(&manifest_path, &record.safe_name).await?;
    tools.compose.up(&manifest_path, &record.safe_name).await?;

    // Readiness
    let report = health::wait_until_healthy(record.port, &record.health_path, &config.health)
        .await
        .with_context(|| {
            format!(
                "Container logs: {}",
                tools.compose.logs_hint(&manifest_path, &record.safe_name)
            )
        })?;
    info!(app = %record.name, attempts = report.attempts, "App is healthy");

    // Certificate (advisory during deploy)
    if record.route == RouteKind::Subdomain {
        let fqdn = record.fqdn(&config.server.base_domain);
        match certbot::ensure_certificate(&config.certbot, &fqdn).await {
            Ok(outcome) => info!(domain = %fqdn, %outcome, "Certificate step finished"),
            Err(e) => warn!(
                domain = %fqdn,
                error = %e,
                "Certificate step could not run; deploy continues, run 'berth cert' later"
            ),
        }
    }

    Ok(record)
}

/// Tear an app down: route out first so traffic stops, then the container,
/// then the manifest stanza. The source tree goes only with `purge`.
pub async fn remove_app(
    config: &Config,
    tools: &Toolbox,
    name: &str,
    purge: bool,
) -> Result<AppRecord> {
    let paths = &config.paths;
    let _lock = RegistryLock::acquire(&paths.lock_path())?;

    let mut registry = Registry::load(paths)?;
    let record = registry.deregister(name)?;

    info!(app = %record.name, "Removing app");

    match record.route {
        RouteKind::Path => {
            routes::remove_path_route(paths, &record, &tools.nginx)?;
        }
        RouteKind::Subdomain => {
            let fqdn = record.fqdn(&config.server.base_domain);
            routes::remove_subdomain_route(paths, &fqdn, &tools.nginx)?;
        }
    }
    tools.nginx.reload()?;

    let manifest_path = paths.compose_path();
    tools.compose.stop(&manifest_path, &record.safe_name).await?;
    tools.compose.rm(&manifest_path, &record.safe_name).await?;

    registry.commit()?;

    if purge {
        let app_dir = paths.app_dir(&record.safe_name);
        if app_dir.exists() {
            warn!(app = %record.name, dir = %app_dir.display(), "Purging source directory");
            std::fs::remove_dir_all(&app_dir)
                .with_context(|| format!("Failed to remove {}", app_dir.display()))?;
        }
    }

    Ok(record)
}

/// Re-deploy already-registered apps: sync source, rebuild, restart, probe.
/// Routes and manifest stanzas are left untouched.
pub async fn redeploy(config: &Config, tools: &Toolbox, names: &[String]) -> Result<()> {
    let paths = &config.paths;
    let registry = Registry::load(paths)?;
    let manifest_path = paths.compose_path();

    for name in names {
        let record = registry.get(name)?;
        info!(app = %record.name, "Re-deploying");

        if let Some(url) = &record.repo_url {
            let app_dir = paths.app_dir(&record.safe_name);
            let outcome = tools.git.sync(url, &app_dir).await?;
            info!(app = %record.name, %outcome, "Source synchronized");
        }

        tools.compose.build(&manifest_path, &record.safe_name).await?;
        tools.compose.up(&manifest_path, &record.safe_name).await?;

        let report = health::wait_until_healthy(record.port, &record.health_path, &config.health)
            .await
            .with_context(|| {
                format!(
                    "Container logs: {}",
                    tools.compose.logs_hint(&manifest_path, &record.safe_name)
                )
            })?;
        info!(app = %record.name, attempts = report.attempts, "App is healthy");
    }

    Ok(())
}
