//! Docker Compose CLI wrapper
//!
//! Containers are built and run through the Compose CLI against the shared
//! manifest, always scoped to the one affected service. Detection prefers
//! the `docker compose` plugin and falls back to standalone
//! `docker-compose`. Build and up output is streamed line by line into the
//! log so the operator sees progress live.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Located Compose CLI: either the docker plugin or the standalone binary
pub struct ComposeCli {
    program: String,
    plugin: bool,
}

impl ComposeCli {
    /// Detect the Compose CLI, preferring the `docker compose` plugin
    pub async fn find() -> Result<Self> {
        let docker_paths = [
            "docker",
            "/usr/bin/docker",
            "/usr/local/bin/docker",
            "/opt/homebrew/bin/docker",
        ];
        for path in docker_paths {
            if let Ok(output) = Command::new(path).args(["compose", "version"]).output().await {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!(path, version = %version.trim(), "Found docker compose plugin");
                    return Ok(Self {
                        program: path.to_string(),
                        plugin: true,
                    });
                }
            }
        }

        let standalone_paths = ["docker-compose", "/usr/bin/docker-compose", "/usr/local/bin/docker-compose"];
        for path in standalone_paths {
            if let Ok(output) = Command::new(path).arg("version").output().await {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!(path, version = %version.trim(), "Found docker-compose");
                    return Ok(Self {
                        program: path.to_string(),
                        plugin: false,
                    });
                }
            }
        }

        anyhow::bail!(
            "Docker Compose not found. Install Docker Engine with the compose plugin:\n\
             - Linux: https://docs.docker.com/engine/install/\n\
             - macOS/Windows: https://www.docker.com/products/docker-desktop"
        )
    }

    /// Human-readable description for `berth doctor`
    pub fn describe(&self) -> String {
        if self.plugin {
            format!("{} compose (plugin)", self.program)
        } else {
            self.program.clone()
        }
    }

    fn command(&self, manifest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        if self.plugin {
            cmd.arg("compose");
        }
        cmd.arg("-f").arg(manifest);
        cmd
    }

    /// Build one service's image
    pub async fn build(&self, manifest: &Path, service: &str) -> Result<()> {
        info!(service, "Building container image");
        let mut cmd = self.command(manifest);
        cmd.arg("build").arg(service);
        run_streamed(cmd, "build").await
    }

    /// Start one service in the background, without touching its dependencies
    pub async fn up(&self, manifest: &Path, service: &str) -> Result<()> {
        info!(service, "Starting container");
        let mut cmd = self.command(manifest);
        cmd.args(["up", "-d", "--no-deps"]).arg(service);
        run_streamed(cmd, "up").await
    }

    /// Stop one service's container
    pub async fn stop(&self, manifest: &Path, service: &str) -> Result<()> {
        info!(service, "Stopping container");
        let mut cmd = self.command(manifest);
        cmd.arg("stop").arg(service);
        run_streamed(cmd, "stop").await
    }

    /// Remove one service's stopped container
    pub async fn rm(&self, manifest: &Path, service: &str) -> Result<()> {
        let mut cmd = self.command(manifest);
        cmd.args(["rm", "-f"]).arg(service);
        run_streamed(cmd, "rm").await
    }

    /// Command line the operator can run to inspect a failing service
    pub fn logs_hint(&self, manifest: &Path, service: &str) -> String {
        if self.plugin {
            format!(
                "{} compose -f {} logs {}",
                self.program,
                manifest.display(),
                service
            )
        } else {
            format!("{} -f {} logs {}", self.program, manifest.display(), service)
        }
    }
}

/// Run a compose invocation, re-logging its output line by line
async fn run_streamed(mut cmd: Command, op: &str) -> Result<()> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("Running: {:?}", cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn compose {}", op))?;

    let stdout = child.stdout.take().context("No stdout handle")?;
    let stderr = child.stderr.take().context("No stderr handle")?;

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(line)) => info!(target: "compose", "{}", line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading compose stdout: {}", e);
                        break;
                    }
                }
            }
            line = stderr_reader.next_line() => {
                match line {
                    Ok(Some(line)) => info!(target: "compose", "{}", line),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Error reading compose stderr: {}", e);
                    }
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for compose {}", op))?;

    if !status.success() {
        anyhow::bail!(
            "compose {} failed with exit code {}",
            op,
            status.code().unwrap_or(-1)
        );
    }

    Ok(())
}
