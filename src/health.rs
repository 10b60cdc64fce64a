//! Readiness probing over raw TCP
//!
//! After a container starts, the app's health endpoint is polled at a fixed
//! interval for a bounded number of attempts. The check is a plain HTTP GET
//! over a raw socket; any 2xx status line counts as healthy.

use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::config::HealthConfig;

/// Outcome of a successful probe loop
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    /// 1-based attempt the endpoint first answered healthy on
    pub attempts: u32,
}

/// Poll until healthy or the attempt budget is exhausted
pub async fn wait_until_healthy(port: u16, path: &str, config: &HealthConfig) -> Result<ProbeReport> {
    let host_port = format!("127.0.0.1:{}", port);

    for attempt in 1..=config.attempts {
        if check_health(&host_port, path, config.timeout()).await {
            info!(port, path, attempt, "Health probe passed");
            return Ok(ProbeReport { attempts: attempt });
        }

        debug!(port, path, attempt, budget = config.attempts, "Health probe failed");

        if attempt < config.attempts {
            tokio::time::sleep(config.interval()).await;
        }
    }

    anyhow::bail!(
        "App on port {} did not answer {} within {} attempts",
        port,
        path,
        config.attempts
    )
}

/// One HTTP GET against the endpoint; true on a 2xx status line
pub async fn check_health(host_port: &str, path: &str, timeout: Duration) -> bool {
    let connect = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(host_port)).await;

    let mut stream = match connect {
        Ok(Ok(s)) => s,
        Ok(Err(_)) | Err(_) => return false,
    };

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host_port
    );

    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }

    let read = tokio::time::timeout(timeout, async {
        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line).await?;
        Ok::<_, std::io::Error>(status_line)
    })
    .await;

    match read {
        Ok(Ok(status_line)) => {
            // Format: "HTTP/1.1 200 OK\r\n"
            status_line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse::<u16>().ok())
                .map(|code| (200..300).contains(&code))
                .unwrap_or(false)
        }
        _ => false,
    }
}
