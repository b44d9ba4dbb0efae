//! Siteforge CLI - manage container-backed local development sites
//!
//! Usage:
//!   siteforge setup                  Bring up shared proxy, mail and scheduler
//!   siteforge create [name]          Create and start a new site
//!   siteforge list                   Show every site with status and backups
//!   siteforge start <name>           Start one site
//!   siteforge stop <name>            Stop one site
//!   siteforge start-all              Start shared stacks and every site
//!   siteforge stop-all               Stop every site and the shared stacks
//!   siteforge backup [name]          Dump one site, or sweep all and prune
//!   siteforge delete <name>          Back up, stop and remove a site

use anyhow::{Context, Result};
use siteforge::backup::BackupOutcome;
use siteforge::config::Config;
use siteforge::error::SiteError;
use siteforge::fleet::DockerFleet;
use siteforge::orchestrator::{CreateRequest, Orchestrator, SweepReport};
use siteforge::site::{DatabaseEngine, SourceMode};
use siteforge::store::Store;
use siteforge::{PKG_NAME, VERSION};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
enum Command {
    Setup,
    Create(CreateOptions),
    List { json: bool },
    Start { name: String },
    Stop { name: String },
    StartAll,
    StopAll,
    Backup { name: Option<String> },
    Delete { name: String, yes: bool },
    Help,
    Version,
}

#[derive(Debug, Default)]
struct CreateOptions {
    name: Option<String>,
    engine: Option<DatabaseEngine>,
    cache: Option<bool>,
    import: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("siteforge=info".parse().expect("valid log directive")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<SiteError>()
            .map(SiteError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let (root_override, args) = extract_root(env::args().skip(1).collect());

    let command = match parse_command(&args) {
        Some(command) => command,
        None => {
            print_help();
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("{} {}", PKG_NAME, VERSION);
            return Ok(());
        }
        _ => {}
    }

    let root = resolve_root(root_override)?;
    let config = Config::load(&root)?;
    let store = Store::open(&root)?;
    let fleet = Arc::new(DockerFleet::connect().await?);
    let orchestrator = Orchestrator::new(store, config, fleet);

    match command {
        Command::Setup => handle_setup(&orchestrator).await?,
        Command::Create(opts) => handle_create(&orchestrator, opts).await?,
        Command::List { json } => handle_list(&orchestrator, json).await?,
        Command::Start { name } => {
            orchestrator.start(&name).await?;
            println!("Started {}", name);
        }
        Command::Stop { name } => {
            orchestrator.stop(&name).await?;
            println!("Stopped {}", name);
        }
        Command::StartAll => {
            let report = orchestrator.start_all().await?;
            print_sweep("Started", &report);
            exit_on_sweep_failure(&report);
        }
        Command::StopAll => {
            let report = orchestrator.stop_all().await?;
            print_sweep("Stopped", &report);
            exit_on_sweep_failure(&report);
        }
        Command::Backup { name } => handle_backup(&orchestrator, name).await?,
        Command::Delete { name, yes } => handle_delete(&orchestrator, &name, yes).await?,
        Command::Help | Command::Version => unreachable!("handled above"),
    }

    Ok(())
}

/// Pull a `--root <dir>` flag out of the argument list.
fn extract_root(args: Vec<String>) -> (Option<PathBuf>, Vec<String>) {
    let mut root = None;
    let mut rest = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--root" {
            root = iter.next().map(PathBuf::from);
        } else if let Some(value) = arg.strip_prefix("--root=") {
            root = Some(PathBuf::from(value));
        } else {
            rest.push(arg);
        }
    }
    (root, rest)
}

fn resolve_root(root_override: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root_override {
        return Ok(root);
    }
    if let Ok(root) = env::var("SITEFORGE_ROOT") {
        return Ok(PathBuf::from(root));
    }
    let home = dirs_next::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".siteforge"))
}

fn parse_command(args: &[String]) -> Option<Command> {
    if args.is_empty() {
        return Some(Command::Help);
    }

    match args[0].as_str() {
        "help" | "--help" | "-h" => Some(Command::Help),
        "version" | "--version" | "-v" => Some(Command::Version),
        "setup" => Some(Command::Setup),
        "create" | "new" => Some(Command::Create(parse_create_options(&args[1..]))),
        "list" | "ls" => Some(Command::List {
            json: args.iter().any(|a| a == "--json"),
        }),
        "start" => args.get(1).map(|name| Command::Start { name: name.clone() }),
        "stop" => args.get(1).map(|name| Command::Stop { name: name.clone() }),
        "start-all" => Some(Command::StartAll),
        "stop-all" => Some(Command::StopAll),
        "backup" => Some(Command::Backup {
            name: args.get(1).filter(|a| !a.starts_with('-')).cloned(),
        }),
        "delete" | "rm" | "destroy" => {
            let name = args.get(1).filter(|a| !a.starts_with('-'))?.clone();
            let yes = args.iter().any(|a| a == "--yes" || a == "-y");
            Some(Command::Delete { name, yes })
        }
        _ => None,
    }
}

fn parse_create_options(args: &[String]) -> CreateOptions {
    let mut opts = CreateOptions {
        name: args.first().filter(|a| !a.starts_with('-')).cloned(),
        ..Default::default()
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--engine" | "-e" => {
                opts.engine = args.get(i + 1).and_then(|s| DatabaseEngine::parse(s));
                i += 2;
            }
            "--cache" => {
                opts.cache = Some(true);
                i += 1;
            }
            "--no-cache" => {
                opts.cache = Some(false);
                i += 1;
            }
            "--import" => {
                opts.import = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    opts
}

async fn handle_setup(orchestrator: &Orchestrator) -> Result<()> {
    println!("Setting up shared infrastructure...");
    let warnings = orchestrator.setup().await?;
    let config = orchestrator.config();
    println!();
    println!("Shared infrastructure is up:");
    println!(
        "  proxy      ports {}/{}",
        config.proxy_http_port, config.proxy_https_port
    );
    println!("  mail       http://{} (capture UI)", config.mail_domain());
    println!("  scheduler  scheduled database backups ({})", config.backup_schedule);
    print_warnings(&warnings);
    Ok(())
}

async fn handle_create(orchestrator: &Orchestrator, opts: CreateOptions) -> Result<()> {
    let name = match opts.name {
        Some(name) => name,
        None => prompt("Site name: ")?,
    };

    let engine = match opts.engine {
        Some(engine) => engine,
        None => {
            let answer = prompt("Database engine [mariadb/postgres] (mariadb): ")?;
            if answer.is_empty() {
                DatabaseEngine::Mariadb
            } else {
                DatabaseEngine::parse(&answer)
                    .with_context(|| format!("unknown database engine '{}'", answer))?
            }
        }
    };

    let cache_enabled = match opts.cache {
        Some(cache) => cache,
        None => {
            let answer = prompt("Enable Redis cache? [y/N]: ")?;
            matches!(answer.to_lowercase().as_str(), "y" | "yes")
        }
    };

    let source_mode = if opts.import {
        SourceMode::ImportedExisting
    } else {
        SourceMode::FreshScaffold
    };

    println!("Creating site...");
    let report = orchestrator
        .create(CreateRequest {
            name,
            engine,
            cache_enabled,
            source_mode,
        })
        .await?;

    println!();
    println!("Site {} created!", report.name);
    println!();
    println!("  Site URL:   {}", report.url);
    println!("  Admin URL:  {}", report.admin_url);
    println!();
    println!("  DB password:       {}", report.credentials.db_password);
    println!("  DB root password:  {}", report.credentials.db_root_password);
    if let Some(cache_password) = &report.credentials.cache_password {
        println!("  Cache password:    {}", cache_password);
    }
    if source_mode == SourceMode::ImportedExisting {
        println!();
        println!("Drop your application tree into the site's app/ directory.");
    }
    print_warnings(&report.warnings);
    Ok(())
}

async fn handle_list(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let statuses = orchestrator.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No sites yet. Create one with: siteforge create <name>");
        return Ok(());
    }

    println!("  NAME                 STATUS    BACKUPS");
    for status in &statuses {
        println!(
            "  {:20} {:9} {}",
            status.name,
            if status.running { "running" } else { "stopped" },
            status.backups
        );
    }
    println!();
    println!("  Total: {} site(s)", statuses.len());
    Ok(())
}

async fn handle_backup(orchestrator: &Orchestrator, name: Option<String>) -> Result<()> {
    match name {
        Some(name) => match orchestrator.backups().backup_one(&name).await? {
            BackupOutcome::Written { path } => {
                println!("Backup written: {}", path.display());
            }
            BackupOutcome::Skipped { reason } => {
                println!("Backup skipped: {}", reason);
            }
        },
        None => {
            let sweep = orchestrator.backups().backup_all().await?;
            for (site, outcome) in &sweep.outcomes {
                match outcome {
                    BackupOutcome::Written { path } => {
                        println!("  {:20} backed up -> {}", site, path.display())
                    }
                    BackupOutcome::Skipped { reason } => {
                        println!("  {:20} skipped ({})", site, reason)
                    }
                }
            }
            for (site, error) in &sweep.failures {
                println!("  {:20} FAILED: {}", site, error);
            }
            if !sweep.pruned.is_empty() {
                println!();
                println!("Pruned {} expired backup file(s)", sweep.pruned.len());
            }
            if !sweep.failures.is_empty() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn handle_delete(orchestrator: &Orchestrator, name: &str, yes: bool) -> Result<()> {
    if !yes {
        println!("Deleting site: {}", name);
        println!();
        println!("This will:");
        println!("  - Take a final database backup");
        println!("  - Stop and remove the site's containers");
        println!("  - Delete the site directory (app tree and database volume)");
        println!();

        let confirmation = prompt("Type the site name to confirm: ")?;
        if confirmation != name {
            println!("Aborted - name did not match");
            return Ok(());
        }
    }

    let warnings = orchestrator.delete(name, true).await?;
    println!("Site {} deleted.", name);
    print_warnings(&warnings);
    Ok(())
}

fn print_sweep(verb: &str, report: &SweepReport) {
    println!(
        "{} {} environment(s), {} failure(s)",
        verb,
        report.attempted.saturating_sub(report.failures.len()),
        report.failures.len()
    );
    for (target, error) in &report.failures {
        println!("  {}: {}", target, error);
    }
}

fn exit_on_sweep_failure(report: &SweepReport) {
    if !report.is_ok() {
        std::process::exit(1);
    }
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    for warning in warnings {
        println!("Warning: {}", warning);
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn print_help() {
    println!(
        r#"
siteforge - container-backed local development sites

USAGE:
    siteforge [--root <dir>] <command> [options]

COMMANDS:
    setup                    Bring up the shared proxy, mail capture and
                             backup scheduler
    create [name]            Create a new site (prompts for anything not
                             given as a flag)
        --engine <engine>    mariadb or postgres (default: mariadb)
        --cache / --no-cache Include a password-protected Redis cache
        --import             Leave app/ empty for an existing source tree
    list [--json]            List sites with running status and backup count
    start <name>             Start one site
    stop <name>              Stop one site
    start-all                Start shared stacks and every site
    stop-all                 Stop every site and the shared stacks
    backup [name]            Dump one site's database, or sweep every site
                             and prune backups older than the retention
                             window
    delete <name> [--yes]    Final backup, stop containers, remove the site

    help                     Show this help
    version                  Show version

ENVIRONMENT:
    SITEFORGE_ROOT           Store root (default: ~/.siteforge)

Sites are reachable at https://<name>.local and their database admin tool
at https://admin.<name>.local once `setup` has run. Captured mail is at
http://mail.local.
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_root() {
        let (root, rest) = extract_root(args(&["--root", "/tmp/sf", "list"]));
        assert_eq!(root, Some(PathBuf::from("/tmp/sf")));
        assert_eq!(rest, args(&["list"]));

        let (root, rest) = extract_root(args(&["list", "--root=/srv/sf"]));
        assert_eq!(root, Some(PathBuf::from("/srv/sf")));
        assert_eq!(rest, args(&["list"]));
    }

    #[test]
    fn test_parse_create_options() {
        let opts = parse_create_options(&args(&[
            "Demo Site",
            "--engine",
            "postgres",
            "--cache",
            "--import",
        ]));
        assert_eq!(opts.name.as_deref(), Some("Demo Site"));
        assert_eq!(opts.engine, Some(DatabaseEngine::Postgres));
        assert_eq!(opts.cache, Some(true));
        assert!(opts.import);
    }

    #[test]
    fn test_parse_command_shapes() {
        assert!(matches!(
            parse_command(&args(&["delete", "demo", "--yes"])),
            Some(Command::Delete { yes: true, .. })
        ));
        assert!(matches!(
            parse_command(&args(&["backup"])),
            Some(Command::Backup { name: None })
        ));
        assert!(matches!(
            parse_command(&args(&["list", "--json"])),
            Some(Command::List { json: true })
        ));
        // start without a name is a usage error
        assert!(parse_command(&args(&["start"])).is_none());
        assert!(parse_command(&args(&["frobnicate"])).is_none());
    }
}
