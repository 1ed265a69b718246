use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kc_broadcast::Broadcaster;
use kc_server::config::MailMode;
use kc_server::{server, telemetry, LogMailer, Mailer, NullMailer, ServerConfig, Service};
use kc_store::{SqlSessionStore, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "keycatd", author, version, about = "Keycat secret store daemon", long_about = None)]
struct Cli {
    /// TOML config file; defaults apply when absent
    #[arg(long, env = "KEYCAT_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Database file, overrides `database.path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Websocket address, overrides `listen.addr`
    #[arg(long, global = true)]
    listen: Option<SocketAddr>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database if needed and apply pending migrations
    Migrate,
    /// Serve live updates
    Run,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("load config")?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Some(addr) = cli.listen {
        config.listen.addr = addr;
    }

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Migrate => {
            telemetry::init(&config.log.filter).map_err(|e| anyhow!(e))?;
            let store = open_store(&config).await?;
            info!(path = %config.database.path.display(), "migrations applied");
            store.close().await;
            Ok(())
        }
        Commands::Run => {
            telemetry::init(&config.log.filter).map_err(|e| anyhow!(e))?;
            run_command(config).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<Store> {
    let path: &Path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Store::open(path, config.database.max_connections)
        .await
        .with_context(|| format!("open database {}", path.display()))
}

async fn run_command(config: ServerConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let (broadcaster, dispatcher) = Broadcaster::spawn(config.broadcast.engine());
    let mailer: Arc<dyn Mailer> = match config.mail.mode {
        MailMode::Log => Arc::new(LogMailer),
        MailMode::Null => Arc::new(NullMailer),
    };
    let sessions = Arc::new(SqlSessionStore::new(store.clone()));
    let service = Arc::new(Service::new(
        store.clone(),
        broadcaster.clone(),
        mailer,
        sessions,
        config.mail.default_locale.clone(),
    ));

    let listener = TcpListener::bind(config.listen.addr)
        .await
        .with_context(|| format!("bind {}", config.listen.addr))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server::serve(
        listener,
        service,
        config.broadcast.ping_interval(),
        shutdown_rx,
    ));

    info!("keycatd started");
    signal::ctrl_c().await?;
    info!("keycatd stopping");
    let _ = shutdown_tx.send(true);
    server_task.await??;
    broadcaster.stop().await?;
    dispatcher.await?;
    store.close().await;
    Ok(())
}
