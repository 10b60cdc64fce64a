//! Application records and name handling
//!
//! Every registered app is described by an [`AppRecord`]: the user-chosen
//! name, the sanitized form used for filenames and container names, the
//! external port it is published on, and how the reverse proxy routes to it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an app name
pub const MAX_NAME_LEN: usize = 63;

/// Default health endpoint served by the app templates
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// How an app is exposed through the reverse proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Served under a path prefix on the shared site (e.g. `/myapp/`)
    Path,
    /// Served from its own server block on `<name>.<base domain>`
    Subdomain,
}

impl RouteKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "path" | "p" => Ok(RouteKind::Path),
            "subdomain" | "sub" | "s" => Ok(RouteKind::Subdomain),
            other => anyhow::bail!("Unknown route kind '{}' (expected 'path' or 'subdomain')", other),
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Path => write!(f, "path"),
            RouteKind::Subdomain => write!(f, "subdomain"),
        }
    }
}

/// A registered application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    /// User-chosen name, validated by [`validate_name`]
    pub name: String,
    /// Sanitized form used for container names, files, and route markers
    pub safe_name: String,
    /// Host port the container publishes
    pub port: u16,
    /// How the proxy routes to this app
    pub route: RouteKind,
    /// Health endpoint path, always with a leading slash
    pub health_path: String,
    /// Source repository, if the app is not scaffolded locally
    pub repo_url: Option<String>,
}

impl AppRecord {
    pub fn new(name: &str, port: u16, route: RouteKind) -> Result<Self> {
        let name = validate_name(name)?;
        Ok(Self {
            safe_name: safe_name(&name),
            name,
            port,
            route,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            repo_url: None,
        })
    }

    pub fn with_health_path(mut self, path: &str) -> Self {
        self.health_path = normalize_health_path(path);
        self
    }

    pub fn with_repo_url(mut self, url: Option<String>) -> Self {
        self.repo_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// Fully-qualified domain for subdomain-routed apps
    pub fn fqdn(&self, base_domain: &str) -> String {
        format!("{}.{}", self.safe_name, base_domain)
    }

    /// Location prefix for path-routed apps
    pub fn path_prefix(&self) -> String {
        format!("/{}/", self.name)
    }

    /// Address the proxy forwards requests to
    pub fn upstream(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

// ==================== Helper Functions ====================

/// Validate an app name (trimmed, non-empty, length-bounded, safe charset)
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();

    if name.is_empty() {
        anyhow::bail!("App name cannot be empty");
    }

    if name.len() > MAX_NAME_LEN {
        anyhow::bail!("App name too long (max {} characters)", MAX_NAME_LEN);
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !valid_chars {
        anyhow::bail!("App name may only contain letters, digits, '-' and '_'");
    }

    // Container names must start with an alphanumeric character
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        anyhow::bail!("App name must start with a letter or digit");
    }

    Ok(name.to_string())
}

/// Sanitize a name for use in container names, filenames and markers
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;

    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }

    while out.ends_with('-') {
        out.pop();
    }

    out
}

/// Ensure a health path starts with a slash
pub fn normalize_health_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        DEFAULT_HEALTH_PATH.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("myapp").unwrap(), "myapp");
        assert_eq!(validate_name("  blog2  ").unwrap(), "blog2");
        assert_eq!(validate_name("my-app_v2").unwrap(), "my-app_v2");
    }

    #[test]
    fn test_validate_name_errors() {
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("my app").is_err());
        assert!(validate_name("app/../etc").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("MyApp"), "myapp");
        assert_eq!(safe_name("my_app"), "my-app");
        assert_eq!(safe_name("My  Weird__Name"), "my-weird-name");
        assert_eq!(safe_name("trailing_"), "trailing");
    }

    #[test]
    fn test_route_kind_parse() {
        assert_eq!(RouteKind::parse("path").unwrap(), RouteKind::Path);
        assert_eq!(RouteKind::parse("SUB").unwrap(), RouteKind::Subdomain);
        assert!(RouteKind::parse("tcp").is_err());
    }

    #[test]
    fn test_record_derived_fields() {
        let rec = AppRecord::new("Blog_API", 8101, RouteKind::Subdomain).unwrap();
        assert_eq!(rec.safe_name, "blog-api");
        assert_eq!(rec.fqdn("example.com"), "blog-api.example.com");
        assert_eq!(rec.upstream(), "127.0.0.1:8101");
        assert_eq!(rec.path_prefix(), "/Blog_API/");
        assert_eq!(rec.health_path, "/health");
    }

    #[test]
    fn test_normalize_health_path() {
        assert_eq!(normalize_health_path("health"), "/health");
        assert_eq!(normalize_health_path("/status"), "/status");
        assert_eq!(normalize_health_path(""), "/health");
    }
}
