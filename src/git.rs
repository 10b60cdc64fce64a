//! Source checkout synchronization via the git CLI
//!
//! Each deploy ensures the app's checkout matches its remote. The outcome is
//! explicit: a pull that cannot fast-forward falls back to a destructive
//! re-clone, but only after a loud warning, and the caller sees which path
//! was taken.

use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::GitConfig;

/// What a sync actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Checkout did not exist, fresh clone
    Cloned,
    /// Pull found nothing new
    UpToDate,
    /// Pull fast-forwarded to the remote head
    FastForwarded,
    /// Pull failed; the checkout was destroyed and cloned again
    Recloned,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Cloned => write!(f, "cloned"),
            SyncOutcome::UpToDate => write!(f, "already up to date"),
            SyncOutcome::FastForwarded => write!(f, "fast-forwarded"),
            SyncOutcome::Recloned => write!(f, "re-cloned after failed pull"),
        }
    }
}

/// Wrapper around the git binary
pub struct GitCli {
    binary: String,
    branch: String,
    depth: Option<u32>,
}

impl GitCli {
    /// Locate the git binary at well-known paths
    pub async fn find(config: &GitConfig) -> Result<Self> {
        let candidates = ["git", "/usr/bin/git", "/usr/local/bin/git", "/opt/homebrew/bin/git"];

        for path in candidates {
            if let Ok(output) = Command::new(path).arg("--version").output().await {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!(path, version = %version.trim(), "Found git");
                    return Ok(Self {
                        binary: path.to_string(),
                        branch: config.branch.clone(),
                        depth: config.depth,
                    });
                }
            }
        }

        anyhow::bail!("git not found. Install it first (apt install git / dnf install git)")
    }

    /// Ensure the checkout at `dest` matches the remote
    pub async fn sync(&self, url: &str, dest: &Path) -> Result<SyncOutcome> {
        if dest.join(".git").exists() {
            match self.pull(dest).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    warn!(
                        dest = %dest.display(),
                        error = %e,
                        "Pull failed, destroying checkout and cloning again"
                    );
                    tokio::fs::remove_dir_all(dest)
                        .await
                        .with_context(|| format!("Failed to remove {}", dest.display()))?;
                    self.clone_into(url, dest).await?;
                    Ok(SyncOutcome::Recloned)
                }
            }
        } else {
            self.clone_into(url, dest).await?;
            Ok(SyncOutcome::Cloned)
        }
    }

    async fn clone_into(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(["clone", "--branch", &self.branch]);
        if let Some(depth) = self.depth {
            cmd.arg("--depth").arg(depth.to_string());
        }
        cmd.arg(url).arg(dest);

        info!(url, dest = %dest.display(), branch = %self.branch, "Cloning");

        let output = cmd.output().await.context("Failed to run git clone")?;
        if !output.status.success() {
            anyhow::bail!(
                "git clone of {} failed: {}",
                url,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn pull(&self, dest: &Path) -> Result<SyncOutcome> {
        let output = Command::new(&self.binary)
            .arg("-C")
            .arg(dest)
            .args(["pull", "--ff-only", "origin", &self.branch])
            .output()
            .await
            .context("Failed to run git pull")?;

        if !output.status.success() {
            anyhow::bail!(
                "git pull in {} failed: {}",
                dest.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(classify_pull_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// A successful `git pull` either reports "Already up to date." or a
/// fast-forward summary
fn classify_pull_output(stdout: &str) -> SyncOutcome {
    if stdout.contains("Already up to date") || stdout.contains("Already up-to-date") {
        SyncOutcome::UpToDate
    } else {
        SyncOutcome::FastForwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pull_output() {
        assert_eq!(
            classify_pull_output("Already up to date.\n"),
            SyncOutcome::UpToDate
        );
        // Older git spelling
        assert_eq!(
            classify_pull_output("Already up-to-date.\n"),
            SyncOutcome::UpToDate
        );
        assert_eq!(
            classify_pull_output("Updating 1a2b3c4..5d6e7f8\nFast-forward\n"),
            SyncOutcome::FastForwarded
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SyncOutcome::Cloned.to_string(), "cloned");
        assert_eq!(
            SyncOutcome::Recloned.to_string(),
            "re-cloned after failed pull"
        );
    }
}
