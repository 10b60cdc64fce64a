use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the deployer
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Locations of the files and directories the tool manages
    #[serde(default)]
    pub paths: PathsConfig,

    /// Host-level settings (domain, server names)
    #[serde(default)]
    pub server: ServerConfig,

    /// External port allocation
    #[serde(default)]
    pub ports: PortsConfig,

    /// Health probe settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Certificate issuance settings
    #[serde(default)]
    pub certbot: CertbotConfig,

    /// Source checkout settings
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Compose manifest holding one service stanza per app
    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    /// Directory the proxy loads site files from
    #[serde(default = "default_sites_dir")]
    pub sites_dir: String,

    /// Shared site file carrying the path-routed location blocks
    #[serde(default = "default_site_file")]
    pub site_file: String,

    /// Directory app sources are cloned into
    #[serde(default = "default_apps_root")]
    pub apps_root: String,

    /// Directory holding per-app env files
    #[serde(default = "default_env_dir")]
    pub env_dir: String,

    /// Advisory lock taken around every registry mutation
    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// Directory for pre-mutation backups of the proxy configuration
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            sites_dir: default_sites_dir(),
            site_file: default_site_file(),
            apps_root: default_apps_root(),
            env_dir: default_env_dir(),
            lock_file: default_lock_file(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl PathsConfig {
    pub fn compose_path(&self) -> PathBuf {
        PathBuf::from(&self.compose_file)
    }

    /// Path of the shared site file inside the sites directory
    pub fn shared_site_path(&self) -> PathBuf {
        Path::new(&self.sites_dir).join(&self.site_file)
    }

    /// Path of a subdomain app's own site file
    pub fn subdomain_site_path(&self, fqdn: &str) -> PathBuf {
        Path::new(&self.sites_dir).join(format!("{}.conf", fqdn))
    }

    /// Directory an app's source lives in
    pub fn app_dir(&self, safe_name: &str) -> PathBuf {
        Path::new(&self.apps_root).join(safe_name)
    }

    /// Per-app env file consumed by the container
    pub fn env_file(&self, safe_name: &str) -> PathBuf {
        Path::new(&self.env_dir).join(format!("{}.env", safe_name))
    }

    /// Optional operator-provided template copied on first deploy
    pub fn env_template(&self, safe_name: &str) -> PathBuf {
        Path::new(&self.env_dir)
            .join("templates")
            .join(format!("{}.env", safe_name))
    }

    /// Advisory lock file taken around registry mutations
    pub fn lock_path(&self) -> PathBuf {
        PathBuf::from(&self.lock_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base domain subdomain apps hang off of (e.g. "example.com")
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// server_name values for the shared site; defaults to the base domain
    #[serde(default)]
    pub server_names: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
            server_names: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// server_name list for the shared site file
    pub fn shared_server_names(&self) -> Vec<String> {
        if self.server_names.is_empty() {
            vec![self.base_domain.clone()]
        } else {
            self.server_names.clone()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortsConfig {
    /// First external port handed out when the manifest has no mappings yet
    #[serde(default = "default_base_port")]
    pub base: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base: default_base_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Delay between probe attempts in milliseconds
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,

    /// Total number of probe attempts before giving up
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval(),
            attempts: default_health_attempts(),
            timeout_ms: default_health_timeout(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CertbotConfig {
    /// Contact email passed to certbot (required when issuing)
    pub email: Option<String>,

    /// Extra arguments appended to every certbot invocation
    #[serde(default)]
    pub extra_args: String,

    /// Domains to skip issuance for, reported as manual follow-ups
    #[serde(default)]
    pub skip_domains: Vec<String>,

    /// Where certbot keeps live certificates
    #[serde(default = "default_certbot_live_dir")]
    pub live_dir: String,
}

impl Default for CertbotConfig {
    fn default() -> Self {
        Self {
            email: None,
            extra_args: String::new(),
            skip_domains: Vec::new(),
            live_dir: default_certbot_live_dir(),
        }
    }
}

impl CertbotConfig {
    /// Split the configured extra arguments shell-style
    pub fn extra_args(&self) -> anyhow::Result<Vec<String>> {
        shell_words::split(&self.extra_args)
            .map_err(|e| anyhow::anyhow!("Invalid certbot.extra_args: {}", e))
    }

    pub fn should_skip(&self, fqdn: &str) -> bool {
        self.skip_domains.iter().any(|d| d == fqdn)
    }

    /// Directory certbot would place this domain's live certificate in
    pub fn live_path(&self, fqdn: &str) -> PathBuf {
        Path::new(&self.live_dir).join(fqdn)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Branch cloned and pulled
    #[serde(default = "default_git_branch")]
    pub branch: String,

    /// Shallow clone depth (full clone when unset)
    pub depth: Option<u32>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch: default_git_branch(),
            depth: None,
        }
    }
}

// Default value functions
fn default_compose_file() -> String {
    "/srv/apps/docker-compose.yml".to_string()
}

fn default_sites_dir() -> String {
    "/etc/nginx/sites-enabled".to_string()
}

fn default_site_file() -> String {
    "apps.conf".to_string()
}

fn default_apps_root() -> String {
    "/srv/apps".to_string()
}

fn default_env_dir() -> String {
    "/srv/apps/env".to_string()
}

fn default_lock_file() -> String {
    "/run/lock/berth.lock".to_string()
}

fn default_backup_dir() -> String {
    "/var/backups/berth".to_string()
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

fn default_base_port() -> u16 {
    8100
}

fn default_health_interval() -> u64 {
    1000 // 1 second between attempts
}

fn default_health_attempts() -> u32 {
    30
}

fn default_health_timeout() -> u64 {
    2000 // 2 seconds per request
}

fn default_certbot_live_dir() -> String {
    "/etc/letsencrypt/live".to_string()
}

fn default_git_branch() -> String {
    "main".to_string()
}

/// System-wide config location checked when nothing explicit is given
const SYSTEM_CONFIG: &str = "/etc/berth/berth.toml";

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config: explicit path, then `BERTH_CONFIG`, then the
    /// system and per-user locations; built-in defaults when none exist
    pub fn discover(explicit: Option<&str>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path, e));
        }
        if let Ok(path) = std::env::var("BERTH_CONFIG") {
            return Self::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path, e));
        }

        let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG)];
        if let Some(config_dir) = dirs_next::config_dir() {
            candidates.push(config_dir.join("berth").join("berth.toml"));
        }

        for candidate in candidates {
            if candidate.exists() {
                return Self::load(&candidate).map_err(|e| {
                    anyhow::anyhow!("Failed to load config {}: {}", candidate.display(), e)
                });
            }
        }

        Ok(Config::default())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.ports.base < 1024 {
            errors.push(format!(
                "ports.base must be an unprivileged port (>= 1024), got {}",
                self.ports.base
            ));
        }

        if self.health.attempts == 0 {
            errors.push("health.attempts must be at least 1".to_string());
        }

        if self.health.interval_ms == 0 {
            errors.push("health.interval_ms must be greater than 0".to_string());
        }

        if self.server.base_domain.trim().is_empty() {
            errors.push("server.base_domain cannot be empty".to_string());
        }

        if let Err(e) = self.certbot.extra_args() {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
