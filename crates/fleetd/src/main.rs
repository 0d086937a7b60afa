//! fleetd — the FleetGrid update server.
//!
//! Single binary that assembles the FleetGrid subsystems:
//! - State store (redb)
//! - Update engine (targets, catalog, actions, confirmation)
//! - Rollout scheduler + periodic sweep
//! - Device and management HTTP API
//!
//! # Usage
//!
//! ```text
//! fleetd serve --port 8080 --data-dir /var/lib/fleetgrid --config fleet.toml
//! fleetd sweep --data-dir /var/lib/fleetgrid
//! fleetd default-config > fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleetgrid_api::{ApiState, build_router};
use fleetgrid_core::{CoreContext, FleetConfig};
use fleetgrid_rollout::{RolloutScheduler, RolloutSweeper};
use fleetgrid_state::{StateStore, SystemClock};

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid update server")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the device and management APIs and run the rollout sweep.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// TOML configuration file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one rollout advancement sweep and exit.
    Sweep {
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(FleetConfig::default()),
    }
}

fn open_context(data_dir: &Path, config: FleetConfig) -> anyhow::Result<CoreContext> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("fleetgrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(CoreContext::new(store, Arc::new(SystemClock), config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
        } => serve(port, data_dir, config).await,
        Command::Sweep { data_dir, config } => {
            let config = load_config(config.as_deref())?;
            let ctx = open_context(&data_dir, config)?;
            let report = RolloutScheduler::new(ctx).sweep();
            info!(
                examined = report.examined,
                advanced = report.advanced,
                failed = report.failed,
                "sweep finished"
            );
            Ok(())
        }
        Command::DefaultConfig => {
            print!("{}", FleetConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(port: u16, data_dir: PathBuf, config: Option<PathBuf>) -> anyhow::Result<()> {
    info!("FleetGrid server starting");

    let config = load_config(config.as_deref())?;
    let sweep_interval = Duration::from_secs(config.rollout.sweep_interval_secs.max(1));
    let ctx = open_context(&data_dir, config)?;

    let state = ApiState::new(ctx);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Rollout sweep ──────────────────────────────────────────

    let sweeper = RolloutSweeper::new(state.rollouts.clone(), sweep_interval);
    let sweep_handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });
    info!(
        interval_secs = sweep_interval.as_secs(),
        "rollout sweeper initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = sweep_handle.await;

    info!("FleetGrid server stopped");
    Ok(())
}
