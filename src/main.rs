use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use memoryd::client::DaemonClient;
use memoryd::config::{self, DaemonConfig};
use memoryd::{db, server};

#[derive(Parser)]
#[command(name = "memoryd", version, about = "Memory daemon for coding agents")]
struct Cli {
    /// Config file (defaults to ~/.claude/memoryd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon in the foreground
    Serve,
    /// Create or migrate the database schema without starting the daemon
    InitDb,
    /// Check whether the daemon answers on its socket
    Ping,
    /// Show PID file and liveness
    Status,
}

/// Log to stderr, and also append to `log_file` when given.
fn init_tracing(config: &DaemonConfig, log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load()?,
    };

    match cli.command {
        Command::Serve => {
            init_tracing(&config, Some(config.resolved_log_path()))?;
            server::serve(config).await?;
        }
        Command::InitDb => {
            init_tracing(&config, None)?;
            let path = config.resolved_db_path();
            let conn = db::open_database(&path, config.pool.statement_timeout())?;
            let version = db::migrations::get_schema_version(&conn)?.unwrap_or(0);
            println!("schema version {version} at {}", path.display());
        }
        Command::Ping => {
            init_tracing(&config, None)?;
            let client = DaemonClient::from_config(&config);
            if client.ping().await {
                println!("ok");
            } else {
                println!("daemon not reachable at {}", client.socket_path().display());
                std::process::exit(1);
            }
        }
        Command::Status => {
            init_tracing(&config, None)?;
            let client = DaemonClient::from_config(&config);
            let pid_path = config.resolved_pid_path();
            let pid = server::pidfile::read_pid(&pid_path);
            let running = client.is_daemon_running(&pid_path).await;
            println!("socket:  {}", client.socket_path().display());
            println!("pid:     {}", pid.map_or_else(|| "-".to_string(), |p| p.to_string()));
            println!("running: {running}");
            println!("config:  {}", cli.config.unwrap_or_else(config::default_config_path).display());
            if !running {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
