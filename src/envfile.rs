//! Per-app environment files
//!
//! Each container reads a `<safe-name>.env` file the tool only guarantees
//! exists: an operator-provided template wins, otherwise a minimal one is
//! synthesized with the keys the starter app consumes. Existing files are
//! never overwritten.

use anyhow::{Context, Result};
use std::fmt;
use tracing::info;

use crate::app::AppRecord;
use crate::config::PathsConfig;
use crate::manifest::INTERNAL_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileOutcome {
    /// File was already there, left untouched
    Existing,
    /// Copied from the operator's template
    CopiedTemplate,
    /// Minimal file written from scratch
    Synthesized,
}

impl fmt::Display for EnvFileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvFileOutcome::Existing => write!(f, "existing"),
            EnvFileOutcome::CopiedTemplate => write!(f, "copied from template"),
            EnvFileOutcome::Synthesized => write!(f, "synthesized"),
        }
    }
}

/// Make sure the app's env file exists before its container starts
pub fn ensure_env_file(paths: &PathsConfig, record: &AppRecord) -> Result<EnvFileOutcome> {
    let env_path = paths.env_file(&record.safe_name);

    if env_path.exists() {
        return Ok(EnvFileOutcome::Existing);
    }

    if let Some(parent) = env_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let template = paths.env_template(&record.safe_name);
    if template.exists() {
        std::fs::copy(&template, &env_path).with_context(|| {
            format!(
                "Failed to copy template {} to {}",
                template.display(),
                env_path.display()
            )
        })?;
        info!(app = %record.name, template = %template.display(), "Env file copied from template");
        return Ok(EnvFileOutcome::CopiedTemplate);
    }

    let content = format!(
        "APP_NAME={}\nPORT={}\nENVIRONMENT=production\n",
        record.name, INTERNAL_PORT
    );
    std::fs::write(&env_path, content)
        .with_context(|| format!("Failed to write {}", env_path.display()))?;
    info!(app = %record.name, path = %env_path.display(), "Env file synthesized");
    Ok(EnvFileOutcome::Synthesized)
}
