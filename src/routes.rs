//! NGINX route table editing
//!
//! The shared site file carries one tagged `location` block per path-routed
//! app; subdomain apps get their own server file in the sites directory.
//! Blocks are identified by a `# <kind>: <name>` marker comment and real
//! brace matching (quote- and comment-aware), so removal is exact: removing
//! one app's block never touches another's, and an add followed by a remove
//! restores the file byte for byte.

use anyhow::{Context, Result};
use std::path::Path;

use crate::app::{AppRecord, RouteKind};
use crate::config::{PathsConfig, ServerConfig};
use crate::guard::{self, SiteChecker};

/// Marker comment tagging a block as owned by this tool
pub fn marker(kind: RouteKind, name: &str) -> String {
    format!("# {}: {}", kind, name)
}

/// Initial shared site file, written when none exists yet
pub fn empty_site(server_names: &[String]) -> String {
    format!(
        "server {{\n    listen 80;\n    server_name {};\n}}\n",
        server_names.join(" ")
    )
}

/// Tagged location block for a path-routed app
pub fn location_block(record: &AppRecord) -> String {
    format!(
        r#"    {marker}
    location {prefix} {{
        proxy_pass http://{upstream}/;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}
"#,
        marker = marker(RouteKind::Path, &record.name),
        prefix = record.path_prefix(),
        upstream = record.upstream(),
    )
}

/// Complete server file for a subdomain-routed app
pub fn server_file(record: &AppRecord, fqdn: &str) -> String {
    format!(
        r#"{marker}
server {{
    listen 80;
    server_name {fqdn};

    location / {{
        proxy_pass http://{upstream};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
    }}
}}
"#,
        marker = marker(RouteKind::Subdomain, &record.name),
        fqdn = fqdn,
        upstream = record.upstream(),
    )
}

/// Net brace depth change of one line, ignoring braces inside quotes
/// and everything after an unquoted `#`
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0i32;
    let mut in_single = false;
    let mut in_double = false;

    for c in line.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => break,
            '{' if !in_single && !in_double => delta += 1,
            '}' if !in_single && !in_double => delta -= 1,
            _ => {}
        }
    }

    delta
}

/// Whether the content already carries the given marker
pub fn contains_marker(content: &str, marker: &str) -> bool {
    content.lines().any(|l| l.trim() == marker)
}

/// Insert a tagged block before the final top-level closing brace
pub fn insert_block(content: &str, block: &str) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();

    let mut depth = 0i32;
    let mut close_idx = None;
    for (i, line) in lines.iter().enumerate() {
        let delta = brace_delta(line);
        depth += delta;
        if depth < 0 {
            anyhow::bail!("Unbalanced braces in site file (extra '}}' on line {})", i + 1);
        }
        if delta < 0 && depth == 0 {
            close_idx = Some(i);
        }
    }
    if depth != 0 {
        anyhow::bail!("Unbalanced braces in site file (unclosed block)");
    }
    let close_idx =
        close_idx.context("Site file has no top-level block to insert the route into")?;

    let mut out = String::with_capacity(content.len() + block.len() + 1);
    for line in &lines[..close_idx] {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(block);
    for line in &lines[close_idx..] {
        out.push_str(line);
        out.push('\n');
    }
    if !content.ends_with('\n') {
        out.pop();
    }

    Ok(out)
}

/// Remove the block tagged with the given marker, including the blank
/// separator line the insertion added
pub fn remove_block(content: &str, marker: &str) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();

    let marker_idx = lines
        .iter()
        .position(|l| l.trim() == marker)
        .with_context(|| format!("Route marker '{}' not found", marker))?;

    let mut depth = 0i32;
    let mut opened = false;
    let mut end_idx = None;
    for (i, line) in lines.iter().enumerate().skip(marker_idx) {
        let delta = brace_delta(line);
        if delta > 0 {
            opened = true;
        }
        depth += delta;
        if opened && depth <= 0 {
            end_idx = Some(i);
            break;
        }
    }
    let end_idx = end_idx
        .with_context(|| format!("Block after marker '{}' is not closed", marker))?;

    // Also drop the blank line insertion placed before the marker
    let start_idx = if marker_idx > 0 && lines[marker_idx - 1].trim().is_empty() {
        marker_idx - 1
    } else {
        marker_idx
    };

    let mut out = String::with_capacity(content.len());
    for (i, line) in lines.iter().enumerate() {
        if i >= start_idx && i <= end_idx {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !content.ends_with('\n') && !out.is_empty() {
        out.pop();
    }

    Ok(out)
}

/// Register a path route in the shared site file
pub fn add_path_route(
    paths: &PathsConfig,
    server: &ServerConfig,
    record: &AppRecord,
    checker: &dyn SiteChecker,
) -> Result<()> {
    let site_path = paths.shared_site_path();
    let current = if site_path.exists() {
        std::fs::read_to_string(&site_path)
            .with_context(|| format!("Failed to read {}", site_path.display()))?
    } else {
        empty_site(&server.shared_server_names())
    };

    let tag = marker(RouteKind::Path, &record.name);
    if contains_marker(&current, &tag) {
        anyhow::bail!("App '{}' already has a route in {}", record.name, site_path.display());
    }

    let updated = insert_block(&current, &location_block(record))?;
    guard::guarded_write(&site_path, &updated, Path::new(&paths.backup_dir), checker)
}

/// Remove a path route from the shared site file
pub fn remove_path_route(
    paths: &PathsConfig,
    record: &AppRecord,
    checker: &dyn SiteChecker,
) -> Result<()> {
    let site_path = paths.shared_site_path();
    if !site_path.exists() {
        anyhow::bail!("Shared site file {} does not exist", site_path.display());
    }
    let current = std::fs::read_to_string(&site_path)
        .with_context(|| format!("Failed to read {}", site_path.display()))?;

    let updated = remove_block(&current, &marker(RouteKind::Path, &record.name))?;
    guard::guarded_write(&site_path, &updated, Path::new(&paths.backup_dir), checker)
}

/// Write a subdomain app's own server file
pub fn add_subdomain_route(
    paths: &PathsConfig,
    record: &AppRecord,
    fqdn: &str,
    checker: &dyn SiteChecker,
) -> Result<()> {
    let site_path = paths.subdomain_site_path(fqdn);
    if site_path.exists() {
        anyhow::bail!("Site file {} already exists", site_path.display());
    }

    let content = server_file(record, fqdn);
    guard::guarded_write(&site_path, &content, Path::new(&paths.backup_dir), checker)
}

/// Delete a subdomain app's server file
pub fn remove_subdomain_route(
    paths: &PathsConfig,
    fqdn: &str,
    checker: &dyn SiteChecker,
) -> Result<()> {
    let site_path = paths.subdomain_site_path(fqdn);
    if !site_path.exists() {
        anyhow::bail!("Site file {} does not exist", site_path.display());
    }
    guard::guarded_remove(&site_path, Path::new(&paths.backup_dir), checker)
}
