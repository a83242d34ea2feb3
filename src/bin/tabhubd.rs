//! tabhub daemon - real-time connection hub
//!
//! Accepts client connections, keeps one active session per user and pushes
//! notifications to them.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:7878)
//! tabhubd start
//!
//! # Start with a config file and a different address
//! tabhubd --config /etc/tabhub.toml start --listen 0.0.0.0:7878
//!
//! # Print the effective configuration
//! tabhubd check-config
//!
//! # Enable debug logging
//! RUST_LOG=tabhubd=debug tabhubd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: stop accepting, close every session, mark users offline

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tabhubd::config::DaemonConfig;
use tabhubd::presence::{channel_presence, spawn_presence_logger};
use tabhubd::registry::spawn_hub;
use tabhubd::server::HubServer;
use tabhubd::status::spawn_status_fanout;

/// How long shutdown waits for pending presence updates to be recorded.
const PRESENCE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// tabhub daemon - per-user session hub with presence tracking
#[derive(Parser, Debug)]
#[command(name = "tabhubd", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "TABHUB_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground
    Start {
        /// Listen address, overriding the config file
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = DaemonConfig::load(args.config.as_deref()).context("Failed to load config")?;

    match args.command.unwrap_or(Command::Start { listen: None }) {
        Command::Start { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            run_daemon(config)
        }
        Command::CheckConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tabhubd=info".parse()?)
                .add_directive("tabhub_core=info".parse()?)
                .add_directive("tabhub_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        listen = %config.listen,
        "tabhub daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // The presence worker outlives the signal so shutdown's offline
    // transitions still get recorded.
    let presence_cancel = CancellationToken::new();
    let (presence, presence_rx) = channel_presence();
    let mut presence_worker = spawn_presence_logger(presence_rx, presence_cancel.clone());

    let hub = spawn_hub(config.hub.clone(), Arc::new(presence));
    info!(takeover = ?config.hub.takeover, "Hub started");

    if config.status_fanout {
        spawn_status_fanout(hub.clone(), cancel_token.clone());
    }

    let server = HubServer::bind(&config.listen, hub.clone(), cancel_token.clone())
        .await?
        .with_handshake_timeout(config.handshake_timeout());

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    if let Err(e) = hub.shutdown().await {
        error!(error = %e, "Hub shutdown failed");
    }
    if timeout(PRESENCE_DRAIN_TIMEOUT, &mut presence_worker).await.is_err() {
        presence_cancel.cancel();
        let _ = presence_worker.await;
    }

    info!("tabhub daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
