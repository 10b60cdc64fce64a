//! Backup, validate, restore discipline for shared proxy files
//!
//! Every mutation of a file NGINX loads goes through [`guarded_write`] or
//! [`guarded_remove`]: the previous contents are copied to a timestamped
//! backup, the change is applied, and the proxy's own syntax checker is run
//! over the result. If the check fails, the previous bytes are restored
//! exactly and the checker's output is surfaced to the operator.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Validates a site file after mutation. Injectable so tests can force
/// failures without a local NGINX install.
pub trait SiteChecker {
    fn check(&self, path: &Path) -> Result<()>;
}

/// The real NGINX binary, used for syntax checks and reloads
pub struct NginxCli {
    binary: String,
}

impl NginxCli {
    /// Locate the nginx binary at well-known paths
    pub fn find() -> Result<Self> {
        let candidates = [
            "nginx",
            "/usr/sbin/nginx",
            "/usr/local/sbin/nginx",
            "/usr/local/bin/nginx",
            "/opt/homebrew/bin/nginx",
        ];

        for path in candidates {
            if let Ok(output) = Command::new(path).arg("-v").output() {
                if output.status.success() {
                    // nginx prints its version on stderr
                    let version = String::from_utf8_lossy(&output.stderr);
                    info!(path, version = %version.trim(), "Found nginx");
                    return Ok(Self {
                        binary: path.to_string(),
                    });
                }
            }
        }

        anyhow::bail!(
            "nginx not found. Install it first:\n\
             - Debian/Ubuntu: apt install nginx\n\
             - RHEL/Fedora:   dnf install nginx"
        )
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Reload the running proxy so route changes take effect
    pub fn reload(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["-s", "reload"])
            .output()
            .context("Failed to run nginx -s reload")?;

        if !output.status.success() {
            anyhow::bail!(
                "nginx reload failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!("nginx reloaded");
        Ok(())
    }
}

impl SiteChecker for NginxCli {
    fn check(&self, _path: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-t")
            .output()
            .context("Failed to run nginx -t")?;

        if !output.status.success() {
            anyhow::bail!(
                "nginx -t rejected the configuration:\n{}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

/// Write new contents under the backup/validate/restore discipline
pub fn guarded_write(
    path: &Path,
    content: &str,
    backup_dir: &Path,
    checker: &dyn SiteChecker,
) -> Result<()> {
    let previous = read_existing(path)?;

    if let Some(bytes) = &previous {
        let backup = write_backup(path, bytes, backup_dir)?;
        info!(file = %path.display(), backup = %backup.display(), "Backed up before mutation");
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if let Err(check_err) = checker.check(path) {
        restore(path, previous.as_deref())?;
        warn!(file = %path.display(), "Syntax check failed, previous contents restored");
        return Err(check_err.context(format!(
            "Mutation of {} rolled back after failed syntax check",
            path.display()
        )));
    }

    Ok(())
}

/// Remove a file under the same discipline
pub fn guarded_remove(path: &Path, backup_dir: &Path, checker: &dyn SiteChecker) -> Result<()> {
    let previous = read_existing(path)?
        .with_context(|| format!("Cannot remove {}: file does not exist", path.display()))?;

    let backup = write_backup(path, &previous, backup_dir)?;
    info!(file = %path.display(), backup = %backup.display(), "Backed up before removal");

    std::fs::remove_file(path)
        .with_context(|| format!("Failed to remove {}", path.display()))?;

    if let Err(check_err) = checker.check(path) {
        restore(path, Some(&previous))?;
        warn!(file = %path.display(), "Syntax check failed, removed file restored");
        return Err(check_err.context(format!(
            "Removal of {} rolled back after failed syntax check",
            path.display()
        )));
    }

    Ok(())
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read(path)
        .map(Some)
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn write_backup(path: &Path, bytes: &[u8], backup_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup dir {}", backup_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("site");
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f");
    let backup = backup_dir.join(format!("{}.{}.bak", file_name, stamp));

    std::fs::write(&backup, bytes)
        .with_context(|| format!("Failed to write backup {}", backup.display()))?;
    Ok(backup)
}

fn restore(path: &Path, previous: Option<&[u8]>) -> Result<()> {
    match previous {
        Some(bytes) => std::fs::write(path, bytes)
            .with_context(|| format!("Failed to restore {}", path.display())),
        None => {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    impl SiteChecker for AlwaysOk {
        fn check(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysFail;
    impl SiteChecker for AlwaysFail {
        fn check(&self, _path: &Path) -> Result<()> {
            anyhow::bail!("nginx: [emerg] unexpected end of file")
        }
    }

    #[test]
    fn test_write_passes_check() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("apps.conf");
        let backups = dir.path().join("backups");

        guarded_write(&site, "server {}\n", &backups, &AlwaysOk).unwrap();
        assert_eq!(std::fs::read_to_string(&site).unwrap(), "server {}\n");
    }

    #[test]
    fn test_failed_check_restores_previous_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("apps.conf");
        let backups = dir.path().join("backups");
        std::fs::write(&site, "server { listen 80; }\n").unwrap();

        let err = guarded_write(&site, "server { broken\n", &backups, &AlwaysFail).unwrap_err();
        assert!(format!("{:#}", err).contains("emerg"));
        assert_eq!(
            std::fs::read(&site).unwrap(),
            b"server { listen 80; }\n".to_vec()
        );
    }

    #[test]
    fn test_failed_check_on_new_file_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("new.conf");
        let backups = dir.path().join("backups");

        assert!(guarded_write(&site, "junk\n", &backups, &AlwaysFail).is_err());
        assert!(!site.exists());
    }

    #[test]
    fn test_backup_written_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("apps.conf");
        let backups = dir.path().join("backups");
        std::fs::write(&site, "original\n").unwrap();

        guarded_write(&site, "updated\n", &backups, &AlwaysOk).unwrap();

        let entries: Vec<_> = std::fs::read_dir(&backups).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let backup_path = entries[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read_to_string(backup_path).unwrap(), "original\n");
    }

    #[test]
    fn test_guarded_remove_restores_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("blog.example.com.conf");
        let backups = dir.path().join("backups");
        std::fs::write(&site, "server {}\n").unwrap();

        assert!(guarded_remove(&site, &backups, &AlwaysFail).is_err());
        assert_eq!(std::fs::read_to_string(&site).unwrap(), "server {}\n");

        guarded_remove(&site, &backups, &AlwaysOk).unwrap();
        assert!(!site.exists());
    }
}
