//! berth - register, deploy, and tear down small web apps on a single host
//!
//! Usage:
//!   berth add [name]             Register and deploy a new app
//!   berth remove <name>          Tear an app down
//!   berth deploy <name[,name]>   Re-deploy registered apps
//!   berth list                   List registered apps
//!   berth info <name>            Show one app's record
//!   berth cert <name>            Request a certificate for a subdomain app
//!   berth doctor                 Check external tools and configured paths

use anyhow::{Context, Result};
use std::io::Write;

use berth::app::{self, AppRecord, RouteKind};
use berth::certbot;
use berth::compose::ComposeCli;
use berth::config::Config;
use berth::deploy::{self, AddRequest, Toolbox};
use berth::git::GitCli;
use berth::guard::NginxCli;
use berth::registry::Registry;

#[derive(Debug)]
enum Command {
    Add(AddArgs),
    Remove { name: String, purge: bool, yes: bool },
    Deploy { names: Vec<String> },
    List { json: bool },
    Info { name: String },
    Cert { name: String },
    Doctor,
    Help,
    Version,
}

#[derive(Debug, Default)]
struct AddArgs {
    name: Option<String>,
    kind: Option<String>,
    health_path: Option<String>,
    repo: Option<String>,
    yes: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("berth=info".parse().expect("valid log directive")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_flag_value(&mut args, "--config")?;

    if args.is_empty() {
        print_help();
        return Ok(());
    }

    let command = parse_command(&args)?;
    let config = Config::discover(config_path.as_deref())?;

    match command {
        Command::Help => print_help(),
        Command::Version => print_version(),
        Command::Add(opts) => handle_add(&config, opts).await?,
        Command::Remove { name, purge, yes } => handle_remove(&config, &name, purge, yes).await?,
        Command::Deploy { names } => handle_deploy(&config, &names).await?,
        Command::List { json } => handle_list(&config, json)?,
        Command::Info { name } => handle_info(&config, &name)?,
        Command::Cert { name } => handle_cert(&config, &name).await?,
        Command::Doctor => handle_doctor(&config).await,
    }

    Ok(())
}

/// Pull `--flag <value>` out of the argument list, wherever it appears
fn take_flag_value(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    let Some(idx) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if idx + 1 >= args.len() {
        anyhow::bail!("{} needs a value", flag);
    }
    let value = args.remove(idx + 1);
    args.remove(idx);
    Ok(Some(value))
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args[0].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "add" | "register" => parse_add(&args[1..]),
        "remove" | "rm" | "delete" => parse_remove(&args[1..]),
        "deploy" | "redeploy" => {
            let spec = args
                .get(1)
                .context("Usage: berth deploy <name[,name...]>")?;
            let names: Vec<String> = spec
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if names.is_empty() {
                anyhow::bail!("Usage: berth deploy <name[,name...]>");
            }
            Ok(Command::Deploy { names })
        }
        "list" | "ls" => Ok(Command::List {
            json: args.iter().any(|a| a == "--json"),
        }),
        "info" | "show" => {
            let name = args.get(1).context("Usage: berth info <name>")?;
            Ok(Command::Info { name: name.clone() })
        }
        "cert" => {
            let name = args.get(1).context("Usage: berth cert <name>")?;
            Ok(Command::Cert { name: name.clone() })
        }
        "doctor" => Ok(Command::Doctor),
        other => anyhow::bail!("Unknown command '{}'. Run 'berth help' for usage", other),
    }
}

fn parse_add(args: &[String]) -> Result<Command> {
    let mut opts = AddArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--kind" => {
                opts.kind = Some(
                    iter.next()
                        .context("--kind needs a value (path or subdomain)")?
                        .clone(),
                )
            }
            "--repo" => opts.repo = Some(iter.next().context("--repo needs a URL")?.clone()),
            "--health-path" => {
                opts.health_path = Some(iter.next().context("--health-path needs a value")?.clone())
            }
            "--yes" | "-y" => opts.yes = true,
            other if !other.starts_with('-') && opts.name.is_none() => {
                opts.name = Some(other.to_string())
            }
            other => anyhow::bail!("Unknown argument '{}' for berth add", other),
        }
    }
    Ok(Command::Add(opts))
}

fn parse_remove(args: &[String]) -> Result<Command> {
    let mut name = None;
    let mut purge = false;
    let mut yes = false;
    for arg in args {
        match arg.as_str() {
            "--purge" => purge = true,
            "--yes" | "-y" => yes = true,
            other if !other.starts_with('-') && name.is_none() => name = Some(other.to_string()),
            other => anyhow::bail!("Unknown argument '{}' for berth remove", other),
        }
    }
    let name = name.context("Usage: berth remove <name> [--purge] [--yes]")?;
    Ok(Command::Remove { name, purge, yes })
}

// ==================== Command Handlers ====================

async fn handle_add(config: &Config, opts: AddArgs) -> Result<()> {
    let name = match opts.name {
        Some(name) => app::validate_name(&name)?,
        None => app::validate_name(&prompt("App name: ")?)?,
    };

    let kind = match opts.kind {
        Some(kind) => RouteKind::parse(&kind)?,
        None => RouteKind::parse(&prompt("Route kind [path/subdomain]: ")?)?,
    };

    let health_path = match opts.health_path {
        Some(path) => path,
        None => {
            let answer = prompt(&format!(
                "Health path [{}]: ",
                app::DEFAULT_HEALTH_PATH
            ))?;
            if answer.is_empty() {
                app::DEFAULT_HEALTH_PATH.to_string()
            } else {
                answer
            }
        }
    };

    let repo_url = match opts.repo {
        Some(url) => Some(url),
        None => {
            let answer = prompt("Repository URL (empty to scaffold a starter app): ")?;
            if answer.is_empty() { None } else { Some(answer) }
        }
    };

    println!();
    println!("About to register:");
    println!("  Name:        {}", name);
    println!("  Route:       {}", kind);
    println!("  Health path: {}", app::normalize_health_path(&health_path));
    match &repo_url {
        Some(url) => println!("  Source:      {}", url),
        None => println!("  Source:      scaffolded starter app"),
    }
    println!();

    if !opts.yes && !confirm("Proceed? [y/N]: ")? {
        anyhow::bail!("Aborted");
    }

    let tools = Toolbox::prepare(config).await?;
    let record = deploy::add_app(
        config,
        &tools,
        AddRequest {
            name,
            kind,
            health_path,
            repo_url,
        },
    )
    .await?;

    println!();
    println!("App {} deployed.", record.name);
    println!("  Port: {}", record.port);
    match record.route {
        RouteKind::Path => {
            println!("  URL:  http://{}{}", config.server.base_domain, record.path_prefix())
        }
        RouteKind::Subdomain => {
            println!("  URL:  http://{}/", record.fqdn(&config.server.base_domain))
        }
    }
    Ok(())
}

async fn handle_remove(config: &Config, name: &str, purge: bool, yes: bool) -> Result<()> {
    println!("Removing app: {}", name);
    println!();
    println!("This will:");
    println!("  - Remove the app's route from the proxy");
    println!("  - Stop and remove its container");
    println!("  - Remove its manifest stanza");
    if purge {
        println!("  - DELETE its source directory");
    }
    println!();

    if !yes && !confirm("Proceed? [y/N]: ")? {
        anyhow::bail!("Aborted");
    }

    if purge && !yes {
        print!("Type the app name to confirm deleting its source: ");
        std::io::stdout().flush()?;
        let mut confirmation = String::new();
        std::io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != name {
            anyhow::bail!("Aborted - name did not match");
        }
    }

    let tools = Toolbox::prepare(config).await?;
    let record = deploy::remove_app(config, &tools, name, purge).await?;

    println!("App {} removed (was on port {}).", record.name, record.port);
    Ok(())
}

async fn handle_deploy(config: &Config, names: &[String]) -> Result<()> {
    let tools = Toolbox::prepare(config).await?;
    deploy::redeploy(config, &tools, names).await?;
    println!("Deployed: {}", names.join(", "));
    Ok(())
}

fn handle_list(config: &Config, json: bool) -> Result<()> {
    let registry = Registry::load(&config.paths)?;
    let records = registry.records()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No apps registered. Add one with: berth add <name>");
        return Ok(());
    }

    println!("{:<20} {:>6}  {:<10} {}", "NAME", "PORT", "ROUTE", "HEALTH");
    for record in records {
        println!(
            "{:<20} {:>6}  {:<10} {}",
            record.name, record.port, record.route, record.health_path
        );
    }
    Ok(())
}

fn handle_info(config: &Config, name: &str) -> Result<()> {
    let registry = Registry::load(&config.paths)?;
    let record = registry.get(name)?;

    println!("App: {}", record.name);
    println!();
    println!("Container:   {}", record.safe_name);
    println!("Port:        {} -> 8000", record.port);
    println!("Route:       {}", route_summary(config, &record));
    println!("Health path: {}", record.health_path);
    match &record.repo_url {
        Some(url) => println!("Source:      {}", url),
        None => println!("Source:      local (scaffolded)"),
    }
    println!("App dir:     {}", config.paths.app_dir(&record.safe_name).display());
    println!("Env file:    {}", config.paths.env_file(&record.safe_name).display());
    Ok(())
}

fn route_summary(config: &Config, record: &AppRecord) -> String {
    match record.route {
        RouteKind::Path => format!(
            "path {} (shared site {})",
            record.path_prefix(),
            config.paths.shared_site_path().display()
        ),
        RouteKind::Subdomain => {
            let fqdn = record.fqdn(&config.server.base_domain);
            format!(
                "subdomain {} ({})",
                fqdn,
                config.paths.subdomain_site_path(&fqdn).display()
            )
        }
    }
}

async fn handle_cert(config: &Config, name: &str) -> Result<()> {
    let registry = Registry::load(&config.paths)?;
    let record = registry.get(name)?;

    if record.route != RouteKind::Subdomain {
        anyhow::bail!(
            "App '{}' is path-routed; certificates apply to subdomain apps",
            name
        );
    }

    let fqdn = record.fqdn(&config.server.base_domain);
    let outcome = certbot::ensure_certificate(&config.certbot, &fqdn).await?;
    println!("{}: {}", fqdn, outcome);

    if !outcome.is_success() {
        anyhow::bail!("Certificate for {} is not in place", fqdn);
    }
    Ok(())
}

async fn handle_doctor(config: &Config) {
    println!("External tools:");
    match ComposeCli::find().await {
        Ok(compose) => println!("  compose: ok ({})", compose.describe()),
        Err(e) => println!("  compose: MISSING - {}", first_line(&e)),
    }
    match NginxCli::find() {
        Ok(nginx) => println!("  nginx:   ok ({})", nginx.binary()),
        Err(e) => println!("  nginx:   MISSING - {}", first_line(&e)),
    }
    match GitCli::find(&config.git).await {
        Ok(_) => println!("  git:     ok"),
        Err(e) => println!("  git:     MISSING - {}", first_line(&e)),
    }
    match certbot::find_certbot().await {
        Ok(path) => println!("  certbot: ok ({})", path),
        Err(e) => println!("  certbot: MISSING - {}", first_line(&e)),
    }

    println!();
    println!("Configured paths:");
    print_path("compose manifest", &config.paths.compose_file);
    print_path("sites dir", &config.paths.sites_dir);
    print_path("apps root", &config.paths.apps_root);
    print_path("env dir", &config.paths.env_dir);
    print_path("backup dir", &config.paths.backup_dir);
}

fn first_line(e: &anyhow::Error) -> String {
    e.to_string().lines().next().unwrap_or_default().to_string()
}

fn print_path(label: &str, path: &str) {
    let exists = if std::path::Path::new(path).exists() {
        "exists"
    } else {
        "absent"
    };
    println!("  {:<16} {} ({})", label, path, exists);
}

// ==================== Prompts ====================

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn confirm(message: &str) -> Result<bool> {
    let answer = prompt(message)?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

fn print_help() {
    println!(
        r#"
berth - single-host app deployer (Docker Compose + NGINX + certbot)

USAGE:
    berth [--config <path>] <command> [options]

COMMANDS:
    add [name]               Register and deploy a new app (prompts for
                             anything not given via flags)
        --kind <k>           Route kind: path or subdomain
        --repo <url>         Clone source from a git repository
        --health-path <p>    Health endpoint (default /health)
        --yes                Skip the confirmation prompt

    remove <name>            Tear an app down
        --purge              Also delete the source directory
        --yes                Skip the confirmation prompts

    deploy <name[,name...]>  Re-deploy registered apps (sync, build,
                             restart, probe; routes untouched)

    list [--json]            List registered apps
    info <name>              Show one app's record
    cert <name>              Request a certificate for a subdomain app
    doctor                   Check external tools and configured paths

    help                     Show this help
    version                  Show version

ENVIRONMENT:
    BERTH_CONFIG             Config file path (default /etc/berth/berth.toml)
    RUST_LOG                 Log filter (default berth=info)
"#
    );
}

fn print_version() {
    println!("berth {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_take_flag_value_extracts_pair() {
        let mut argv = args(&["--config", "/tmp/berth.toml", "list"]);
        let value = take_flag_value(&mut argv, "--config").unwrap();
        assert_eq!(value.as_deref(), Some("/tmp/berth.toml"));
        assert_eq!(argv, args(&["list"]));
    }

    #[test]
    fn test_take_flag_value_absent_flag() {
        let mut argv = args(&["list"]);
        assert_eq!(take_flag_value(&mut argv, "--config").unwrap(), None);
        assert_eq!(argv, args(&["list"]));
    }

    #[test]
    fn test_take_flag_value_missing_value_is_an_error() {
        let mut argv = args(&["list", "--config"]);
        let err = take_flag_value(&mut argv, "--config").unwrap_err();
        assert!(err.to_string().contains("--config needs a value"));
    }
}
