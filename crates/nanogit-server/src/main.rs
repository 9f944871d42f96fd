//! nanogit binary.
//!
//! ```bash
//! nanogit server --config /etc/nanogit/config.yml --loglevel 2
//! nanogit check-config -c config.yml
//! nanogit list-users
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use nanogit_server::config::{load_config, DEFAULT_CONFIG_PATH};
use nanogit_server::logging::{self, DEFAULT_LOGLEVEL};
use nanogit_server::{ssh_server_builder, AclStore, AllowAll};
use nanogit_ssh::GitSshServer;

#[derive(Parser, Debug)]
#[command(name = "nanogit", version, about = "Simple git server over SSH")]
struct Cli {
    /// 0=trace, 1=debug, 2=info, 3=warn, 4=error, 5=critical, 6=fatal
    #[arg(long, global = true, default_value_t = DEFAULT_LOGLEVEL)]
    loglevel: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the nanogit server
    Server(ServerArgs),
    /// Load the configuration file and print a summary
    CheckConfig(ConfigArg),
    /// List configured users
    ListUsers(ConfigArg),
}

#[derive(Args, Debug)]
struct ConfigArg {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct ServerArgs {
    #[command(flatten)]
    config: ConfigArg,

    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logging = logging::init(cli.loglevel);

    let result = match cli.command {
        Command::Server(args) => run_server(args).await,
        Command::CheckConfig(args) => check_config(&args.config),
        Command::ListUsers(args) => list_users(&args.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("nanogit: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let path = expand(&args.config.config);
    let acl = Arc::new(AclStore::open(&path)?);

    let mut builder = ssh_server_builder(&acl, Arc::new(AllowAll));
    if let Some(host) = args.host {
        builder = builder.host(host);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    let server_config = builder.build().context("invalid server configuration")?;
    tracing::info!(config = ?server_config, "starting nanogit");

    let server = GitSshServer::new(server_config)
        .bind()
        .await
        .context("cannot start ssh server")?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(acl, shutdown.clone())?;
    server.serve(shutdown).await;
    tracing::info!("nanogit stopped");
    Ok(())
}

/// SIGINT/SIGTERM stop accepting connections; SIGHUP reloads the ACL file.
fn spawn_signal_handler(acl: Arc<AclStore>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received");
                    break;
                }
                _ = hangup.recv() => {
                    if let Err(e) = acl.reload() {
                        tracing::warn!(error = %e, "acl reload failed, keeping previous config");
                    }
                }
            }
        }
        shutdown.cancel();
    });
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let path = expand(path);
    let config = load_config(&path)?;

    println!("{}: ok", path.display());
    match config.data_root() {
        Some(root) => println!("  data root:   {}", root.display()),
        None => println!("  data root:   (unset, every repository request will fail)"),
    }
    println!("  listen:      {}:{}", config.server.host, config.server.port);
    println!("  host key:    {}", config.private_key_path().display());
    println!("  orgs:        {}", config.orgs.len());
    for org in &config.orgs {
        let teams: Vec<String> = org
            .teams
            .iter()
            .map(|t| {
                let read = if t.read { "r" } else { "-" };
                let write = if t.write { "w" } else { "-" };
                format!("{}({read}{write})", t.name)
            })
            .collect();
        println!("    {:<16} {}", org.id, teams.join(" "));
    }
    println!("  users:       {}", config.users.len());
    Ok(())
}

fn list_users(path: &Path) -> anyhow::Result<()> {
    let config = load_config(&expand(path))?;

    if config.users.is_empty() {
        println!("No users configured.");
        return Ok(());
    }
    println!("{:<20} {:>5}  ORGS", "NAME", "KEYS");
    for user in &config.users {
        let orgs: Vec<String> = user
            .orgs
            .iter()
            .map(|m| format!("{}[{}]", m.id, m.teams.join(",")))
            .collect();
        println!("{:<20} {:>5}  {}", user.name, user.ssh_keys.len(), orgs.join(" "));
    }
    Ok(())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
