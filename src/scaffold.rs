//! Starter app scaffolding
//!
//! When `add` is given no repository URL, the app directory is seeded with a
//! minimal FastAPI service: a root endpoint, the `/health` endpoint the
//! probes and the container healthcheck rely on, and a Dockerfile binding
//! the fixed internal port. A directory that already has files is left
//! alone.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::app::AppRecord;

const MAIN_PY: &str = r#"""Starter FastAPI app with health checks."""

import os
from datetime import datetime, timezone
from typing import Any, Dict

from fastapi import FastAPI

app = FastAPI(title=os.getenv("APP_NAME", "app"))


@app.get("/")
async def root() -> Dict[str, Any]:
    return {
        "app_name": os.getenv("APP_NAME", "unknown"),
        "timestamp": datetime.now(timezone.utc).isoformat(),
        "status": "running",
    }


@app.get("/health")
async def health() -> Dict[str, Any]:
    return {
        "status": "healthy",
        "app_name": os.getenv("APP_NAME", "unknown"),
        "environment": os.getenv("ENVIRONMENT", "development"),
        "timestamp": datetime.now(timezone.utc).isoformat(),
    }
"#;

const REQUIREMENTS_TXT: &str = "fastapi>=0.110\nuvicorn[standard]>=0.29\n";

const DOCKERFILE: &str = r#"FROM python:3.11-slim

WORKDIR /app

RUN apt-get update \
    && apt-get install -y --no-install-recommends curl \
    && rm -rf /var/lib/apt/lists/*

COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt

COPY . .

EXPOSE 8000

CMD ["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000"]
"#;

/// Seed the app directory with starter files. Returns false when the
/// directory already has content.
pub fn scaffold_app(dir: &Path, record: &AppRecord) -> Result<bool> {
    if dir.exists() {
        let occupied = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .next()
            .is_some();
        if occupied {
            return Ok(false);
        }
    } else {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    std::fs::write(dir.join("main.py"), MAIN_PY)
        .with_context(|| format!("Failed to write {}", dir.join("main.py").display()))?;
    std::fs::write(dir.join("requirements.txt"), REQUIREMENTS_TXT)
        .context("Failed to write requirements.txt")?;
    std::fs::write(dir.join("Dockerfile"), DOCKERFILE).context("Failed to write Dockerfile")?;

    info!(app = %record.name, dir = %dir.display(), "Scaffolded starter app");
    Ok(true)
}
