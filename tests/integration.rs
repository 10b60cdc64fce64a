//! Integration tests for berth's registry and route workflows
//!
//! These exercise the load-mutate-commit cycle over a real temporary tree,
//! with a stub syntax checker standing in for nginx and a local TCP
//! listener standing in for a deployed app.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use berth::app::{AppRecord, RouteKind};
use berth::config::{HealthConfig, PathsConfig, ServerConfig};
use berth::envfile::{self, EnvFileOutcome};
use berth::guard::SiteChecker;
use berth::health;
use berth::lock::RegistryLock;
use berth::manifest::Manifest;
use berth::registry::{Registry, RegistryError};
use berth::routes;

// ==================== Helpers ====================

fn test_paths(root: &Path) -> PathsConfig {
    PathsConfig {
        compose_file: root.join("docker-compose.yml").display().to_string(),
        sites_dir: root.join("sites").display().to_string(),
        site_file: "apps.conf".to_string(),
        apps_root: root.join("apps").display().to_string(),
        env_dir: root.join("env").display().to_string(),
        lock_file: root.join("berth.lock").display().to_string(),
        backup_dir: root.join("backups").display().to_string(),
    }
}

fn test_server() -> ServerConfig {
    ServerConfig {
        base_domain: "example.com".to_string(),
        server_names: Vec::new(),
    }
}

fn record(name: &str, port: u16, kind: RouteKind) -> AppRecord {
    AppRecord::new(name, port, kind).unwrap()
}

/// Checker that always passes
struct OkChecker;
impl SiteChecker for OkChecker {
    fn check(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Checker that always rejects, like nginx -t on a broken config
struct FailChecker;
impl SiteChecker for FailChecker {
    fn check(&self, _path: &Path) -> Result<()> {
        anyhow::bail!("nginx: [emerg] unexpected \"}}\" in /etc/nginx/sites-enabled/apps.conf")
    }
}

// ==================== Registration Workflow ====================

#[test]
fn test_prefix_named_apps_get_distinct_ports_and_stanzas() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());

    // Register "foo", then "foobar", each through a fresh load
    for (name, expected_port) in [("foo", 8100u16), ("foobar", 8101u16)] {
        let mut registry = Registry::load(&paths).unwrap();
        let port = registry.allocate_port(8100).unwrap();
        assert_eq!(port, expected_port);
        registry
            .register(&record(name, port, RouteKind::Path))
            .unwrap();
        registry.commit().unwrap();
    }

    let manifest = Manifest::load(&paths.compose_path()).unwrap();
    assert_eq!(manifest.services.len(), 2);
    assert!(manifest.contains("foo"));
    assert!(manifest.contains("foobar"));
    assert_eq!(manifest.services["foo"].host_port(), Some(8100));
    assert_eq!(manifest.services["foobar"].host_port(), Some(8101));
}

#[test]
fn test_registering_the_same_name_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());

    let mut registry = Registry::load(&paths).unwrap();
    registry
        .register(&record("blog", 8100, RouteKind::Path))
        .unwrap();
    registry.commit().unwrap();

    let mut registry = Registry::load(&paths).unwrap();
    let err = registry
        .register(&record("blog", 8101, RouteKind::Path))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName(_)));

    // Nothing was duplicated on disk
    registry.commit().unwrap();
    let manifest = Manifest::load(&paths.compose_path()).unwrap();
    assert_eq!(manifest.services.len(), 1);
}

#[test]
fn test_removing_foo_leaves_foobar_registered() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());

    let mut registry = Registry::load(&paths).unwrap();
    registry
        .register(&record("foo", 8100, RouteKind::Path))
        .unwrap();
    registry
        .register(&record("foobar", 8101, RouteKind::Path))
        .unwrap();
    registry.commit().unwrap();

    let mut registry = Registry::load(&paths).unwrap();
    registry.deregister("foo").unwrap();
    registry.commit().unwrap();

    let registry = Registry::load(&paths).unwrap();
    assert!(registry.get("foo").is_err());
    let survivor = registry.get("foobar").unwrap();
    assert_eq!(survivor.port, 8101);
}

// ==================== Route Table Workflow ====================

#[test]
fn test_route_add_then_remove_round_trips_the_site_file() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();
    let rec = record("blog", 8100, RouteKind::Path);

    // Seed the shared site file so there is a known pre-add state
    std::fs::create_dir_all(&paths.sites_dir).unwrap();
    let original = routes::empty_site(&server.shared_server_names());
    std::fs::write(paths.shared_site_path(), &original).unwrap();

    routes::add_path_route(&paths, &server, &rec, &OkChecker).unwrap();
    let with_route = std::fs::read_to_string(paths.shared_site_path()).unwrap();
    assert!(with_route.contains("# path: blog"));

    routes::remove_path_route(&paths, &rec, &OkChecker).unwrap();
    let after = std::fs::read_to_string(paths.shared_site_path()).unwrap();
    assert_eq!(after.trim_end(), original.trim_end());
}

#[test]
fn test_failed_syntax_check_restores_pre_mutation_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();

    std::fs::create_dir_all(&paths.sites_dir).unwrap();
    let original = routes::empty_site(&server.shared_server_names());
    std::fs::write(paths.shared_site_path(), &original).unwrap();

    let err = routes::add_path_route(
        &paths,
        &server,
        &record("blog", 8100, RouteKind::Path),
        &FailChecker,
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("emerg"));

    // Byte-for-byte restore, and a backup was kept
    let after = std::fs::read(paths.shared_site_path()).unwrap();
    assert_eq!(after, original.as_bytes());
    assert!(std::fs::read_dir(&paths.backup_dir).unwrap().next().is_some());
}

#[test]
fn test_removing_foo_route_leaves_foobar_route_intact() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();

    let foo = record("foo", 8100, RouteKind::Path);
    let foobar = record("foobar", 8101, RouteKind::Path);

    routes::add_path_route(&paths, &server, &foo, &OkChecker).unwrap();
    routes::add_path_route(&paths, &server, &foobar, &OkChecker).unwrap();
    routes::remove_path_route(&paths, &foo, &OkChecker).unwrap();

    let content = std::fs::read_to_string(paths.shared_site_path()).unwrap();
    assert!(!content.contains("# path: foo\n"));
    assert!(!content.contains("location /foo/ {"));
    assert!(content.contains("# path: foobar"));
    assert!(content.contains("location /foobar/ {"));
    assert!(content.contains("proxy_pass http://127.0.0.1:8101/;"));
}

#[test]
fn test_removing_an_unrouted_app_is_a_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();

    routes::add_path_route(&paths, &server, &record("blog", 8100, RouteKind::Path), &OkChecker)
        .unwrap();

    let err = routes::remove_path_route(&paths, &record("ghost", 8101, RouteKind::Path), &OkChecker)
        .unwrap_err();
    assert!(err.to_string().contains("# path: ghost"));

    // The site file was not touched
    let content = std::fs::read_to_string(paths.shared_site_path()).unwrap();
    assert!(content.contains("# path: blog"));
}

#[test]
fn test_subdomain_route_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let rec = record("blog", 8100, RouteKind::Subdomain);
    let fqdn = rec.fqdn("example.com");

    routes::add_subdomain_route(&paths, &rec, &fqdn, &OkChecker).unwrap();
    let site = paths.subdomain_site_path(&fqdn);
    let content = std::fs::read_to_string(&site).unwrap();
    assert!(content.contains("# subdomain: blog"));
    assert!(content.contains("server_name blog.example.com;"));

    // Re-adding is refused
    assert!(routes::add_subdomain_route(&paths, &rec, &fqdn, &OkChecker).is_err());

    // A failed check keeps the file; a passing one removes it
    assert!(routes::remove_subdomain_route(&paths, &fqdn, &FailChecker).is_err());
    assert!(site.exists());
    routes::remove_subdomain_route(&paths, &fqdn, &OkChecker).unwrap();
    assert!(!site.exists());
}

#[test]
fn test_hand_edited_site_content_survives_route_changes() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();

    let hand_written = "server {\n    listen 80;\n    server_name example.com;\n\n    # operator note, do not remove\n    location /static/ {\n        root /var/www;\n    }\n}\n";
    std::fs::create_dir_all(&paths.sites_dir).unwrap();
    std::fs::write(paths.shared_site_path(), hand_written).unwrap();

    let rec = record("blog", 8100, RouteKind::Path);
    routes::add_path_route(&paths, &server, &rec, &OkChecker).unwrap();
    routes::remove_path_route(&paths, &rec, &OkChecker).unwrap();

    let after = std::fs::read_to_string(paths.shared_site_path()).unwrap();
    assert_eq!(after.trim_end(), hand_written.trim_end());
}

// ==================== Locking ====================

#[cfg(unix)]
#[test]
fn test_concurrent_mutations_are_excluded_by_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());

    let held = RegistryLock::acquire(&paths.lock_path()).unwrap();
    assert!(RegistryLock::acquire(&paths.lock_path()).is_err());
    drop(held);
    assert!(RegistryLock::acquire(&paths.lock_path()).is_ok());
}

// ==================== Env Files ====================

#[test]
fn test_env_file_is_created_once_and_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let rec = record("blog", 8100, RouteKind::Path);

    assert_eq!(
        envfile::ensure_env_file(&paths, &rec).unwrap(),
        EnvFileOutcome::Synthesized
    );
    assert_eq!(
        envfile::ensure_env_file(&paths, &rec).unwrap(),
        EnvFileOutcome::Existing
    );
}

// ==================== Health Probing ====================

/// Serve `fail_count` failing responses, then succeed, counting requests
async fn spawn_app_stand_in(fail_count: u32) -> (u16, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).await;
            let response = if seen <= fail_count {
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n"
            } else {
                "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
            };
            let _ = stream.write_all(response.as_bytes()).await;
        }
    });

    (port, requests)
}

fn probe_config(attempts: u32) -> HealthConfig {
    HealthConfig {
        interval_ms: 10,
        attempts,
        timeout_ms: 500,
    }
}

#[tokio::test]
async fn test_probe_succeeds_once_app_becomes_ready() {
    let (port, requests) = spawn_app_stand_in(2).await;

    let report = health::wait_until_healthy(port, "/health", &probe_config(10))
        .await
        .unwrap();
    assert_eq!(report.attempts, 3);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_probe_fails_after_exactly_the_attempt_budget() {
    let (port, requests) = spawn_app_stand_in(u32::MAX).await;

    let err = health::wait_until_healthy(port, "/health", &probe_config(4))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("4 attempts"));
    assert_eq!(requests.load(Ordering::SeqCst), 4);
}

// ==================== End-to-End Registration State ====================

#[test]
fn test_full_registration_state_is_reloadable() {
    let dir = tempfile::tempdir().unwrap();
    let paths = test_paths(dir.path());
    let server = test_server();

    // One path app, one subdomain app, registered like the add workflow does
    let mut registry = Registry::load(&paths).unwrap();
    let blog = record("blog", registry.allocate_port(8100).unwrap(), RouteKind::Path)
        .with_repo_url(Some("https://example.com/blog.git".to_string()));
    registry.register(&blog).unwrap();
    registry.commit().unwrap();
    envfile::ensure_env_file(&paths, &blog).unwrap();
    routes::add_path_route(&paths, &server, &blog, &OkChecker).unwrap();

    let mut registry = Registry::load(&paths).unwrap();
    let api = record("api", registry.allocate_port(8100).unwrap(), RouteKind::Subdomain)
        .with_health_path("/status");
    registry.register(&api).unwrap();
    registry.commit().unwrap();
    envfile::ensure_env_file(&paths, &api).unwrap();
    routes::add_subdomain_route(&paths, &api, &api.fqdn("example.com"), &OkChecker).unwrap();

    // A fresh process sees the same records
    let registry = Registry::load(&paths).unwrap();
    let records = registry.records().unwrap();
    assert_eq!(records.len(), 2);

    let blog = registry.get("blog").unwrap();
    assert_eq!(blog.port, 8100);
    assert_eq!(blog.route, RouteKind::Path);
    assert_eq!(blog.repo_url.as_deref(), Some("https://example.com/blog.git"));

    let api = registry.get("api").unwrap();
    assert_eq!(api.port, 8101);
    assert_eq!(api.route, RouteKind::Subdomain);
    assert_eq!(api.health_path, "/status");

    assert!(paths.subdomain_site_path("api.example.com").exists());
    assert!(paths.env_file("blog").exists());
    assert!(paths.env_file("api").exists());
}
