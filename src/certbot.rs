//! SSL issuance via the certbot CLI
//!
//! Issuance is advisory during a deploy: a configured skip-list and a
//! live-directory check short-circuit the call, and a failed certbot run is
//! reported as a manual follow-up rather than failing the deploy. The
//! standalone `berth cert` command treats the same outcomes strictly.

use anyhow::{Context, Result};
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::CertbotConfig;

/// Outcome of a certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertOutcome {
    /// certbot issued (or renewed) the certificate
    Issued,
    /// A live certificate already exists for the domain
    AlreadyPresent,
    /// Domain is on the configured skip-list
    SkipListed,
    /// No contact email configured, issuance not attempted
    NoEmail,
    /// certbot ran and failed; exit code in the message
    Failed(String),
}

impl CertOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CertOutcome::Issued | CertOutcome::AlreadyPresent)
    }
}

impl fmt::Display for CertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertOutcome::Issued => write!(f, "certificate issued"),
            CertOutcome::AlreadyPresent => write!(f, "certificate already present"),
            CertOutcome::SkipListed => write!(f, "domain on skip-list, issue manually"),
            CertOutcome::NoEmail => write!(f, "no certbot.email configured, issue manually"),
            CertOutcome::Failed(reason) => write!(f, "issuance failed: {}", reason),
        }
    }
}

/// Locate the certbot binary at well-known paths
pub async fn find_certbot() -> Result<String> {
    let candidates = [
        "certbot",
        "/usr/bin/certbot",
        "/usr/local/bin/certbot",
        "/snap/bin/certbot",
    ];

    for path in candidates {
        if let Ok(output) = Command::new(path).arg("--version").output().await {
            if output.status.success() {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(path, version = %version.trim(), "Found certbot");
                return Ok(path.to_string());
            }
        }
    }

    anyhow::bail!("certbot not found. Install it first (apt install certbot python3-certbot-nginx)")
}

/// Request a certificate for the domain unless a short-circuit applies.
/// Errors only on local problems (bad config, missing binary); a failed
/// certbot run is an outcome, not an error.
pub async fn ensure_certificate(config: &CertbotConfig, fqdn: &str) -> Result<CertOutcome> {
    if config.should_skip(fqdn) {
        warn!(
            domain = fqdn,
            "Domain is on the certbot skip-list; request a certificate manually"
        );
        return Ok(CertOutcome::SkipListed);
    }

    if config.live_path(fqdn).exists() {
        info!(domain = fqdn, "Live certificate already present");
        return Ok(CertOutcome::AlreadyPresent);
    }

    let Some(email) = &config.email else {
        warn!(
            domain = fqdn,
            "certbot.email is not configured; request a certificate manually"
        );
        return Ok(CertOutcome::NoEmail);
    };

    let binary = find_certbot().await?;
    let extra_args = config.extra_args()?;

    let mut cmd = Command::new(&binary);
    cmd.args(["--nginx", "-d", fqdn, "-n", "--agree-tos", "-m", email]);
    cmd.args(&extra_args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    info!(domain = fqdn, "Requesting certificate");
    debug!("Running: {:?}", cmd);

    let mut child = cmd.spawn().context("Failed to spawn certbot")?;

    let stdout = child.stdout.take().context("No stdout handle")?;
    let stderr = child.stderr.take().context("No stderr handle")?;
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(line)) => info!(target: "certbot", "{}", line),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            line = stderr_reader.next_line() => {
                match line {
                    Ok(Some(line)) => info!(target: "certbot", "{}", line),
                    Ok(None) => {}
                    Err(_) => {}
                }
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for certbot")?;

    if status.success() {
        info!(domain = fqdn, "Certificate issued");
        Ok(CertOutcome::Issued)
    } else {
        let reason = format!("certbot exited with code {}", status.code().unwrap_or(-1));
        warn!(
            domain = fqdn,
            %reason,
            "Certificate issuance failed; the app is deployed over plain HTTP. \
             Check DNS for the domain and re-run 'berth cert' once it resolves"
        );
        Ok(CertOutcome::Failed(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skip_listed_domain_short_circuits() {
        let config = CertbotConfig {
            email: Some("ops@example.com".to_string()),
            skip_domains: vec!["legacy.example.com".to_string()],
            ..Default::default()
        };

        let outcome = ensure_certificate(&config, "legacy.example.com")
            .await
            .unwrap();
        assert_eq!(outcome, CertOutcome::SkipListed);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_existing_live_dir_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog.example.com")).unwrap();

        let config = CertbotConfig {
            email: Some("ops@example.com".to_string()),
            live_dir: dir.path().display().to_string(),
            ..Default::default()
        };

        let outcome = ensure_certificate(&config, "blog.example.com").await.unwrap();
        assert_eq!(outcome, CertOutcome::AlreadyPresent);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_missing_email_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let config = CertbotConfig {
            live_dir: dir.path().display().to_string(),
            ..Default::default()
        };

        let outcome = ensure_certificate(&config, "blog.example.com").await.unwrap();
        assert_eq!(outcome, CertOutcome::NoEmail);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CertOutcome::Issued.to_string(), "certificate issued");
        assert!(CertOutcome::Failed("certbot exited with code 1".to_string())
            .to_string()
            .contains("code 1"));
    }
}
