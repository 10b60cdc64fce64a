//! Berth - single-host app provisioning over Docker Compose and NGINX
//!
//! This library backs the `berth` CLI, which registers, deploys, and tears
//! down small web applications on one host:
//! - Keeps a typed registry of apps inside the Compose manifest
//! - Allocates each app a unique external port mapped to a fixed internal one
//! - Inserts and removes tagged NGINX route blocks with real brace matching
//! - Guards every proxy-file mutation with backup, syntax check, and restore
//! - Drives git, docker compose, and certbot through their CLIs
//! - Polls each app's health endpoint after (re)start

pub mod app;
pub mod certbot;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod envfile;
pub mod git;
pub mod guard;
pub mod health;
pub mod lock;
pub mod manifest;
pub mod ports;
pub mod registry;
pub mod routes;
pub mod scaffold;
