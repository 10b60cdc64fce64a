//! Advisory file lock serializing registry mutations
//!
//! Every add/remove workflow holds this lock across its whole
//! load-mutate-write cycle, so two concurrent invocations cannot interleave
//! reads and writes of the manifest or route table. The lock is held for the
//! lifetime of the returned guard.

use anyhow::{Context, Result};
use std::path::Path;

/// Held for the duration of a registry mutation
#[cfg(unix)]
#[derive(Debug)]
pub struct RegistryLock {
    _file: std::fs::File,
}

#[cfg(unix)]
impl RegistryLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        use std::io::Write;
        use std::os::unix::io::AsRawFd;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                anyhow::bail!(
                    "Another berth operation is already in progress (lock held on {})",
                    path.display()
                );
            }
            return Err(err).context("Failed to lock registry");
        }

        let pid = std::process::id();
        writeln!(&file, "{}", pid)?;

        // The lock lives as long as the file handle
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
pub struct RegistryLock;

#[cfg(not(unix))]
impl RegistryLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        use std::io::Write;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.lock");

        let first = RegistryLock::acquire(&path).unwrap();
        let err = RegistryLock::acquire(&path).unwrap_err().to_string();
        assert!(err.contains("already in progress"));

        drop(first);
        RegistryLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_lock_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/berth.lock");
        RegistryLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
