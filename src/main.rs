#![forbid(unsafe_code)]

//! `room-warden` — agent lifecycle manager binary.
//!
//! Bootstraps configuration, starts the lifecycle coordinator, the process
//! supervisor's exit poller, the GC and health tickers, and the HTTP
//! ingress/control API. On SIGTERM or ctrl-c every agent process is killed
//! before the binary exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use room_warden::config::GlobalConfig;
use room_warden::coordinator::{CoordinatorHandle, LifecycleCoordinator, EVENT_QUEUE_CAPACITY};
use room_warden::supervisor::ProcessSupervisor;
use room_warden::{gc, health, http, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "room-warden", about = "Agent lifecycle manager for voice coaching rooms", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration file.
    #[arg(long)]
    http_port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("room-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(
        agent_binary = %config.agent.binary,
        max_agents = config.agent.max_agents,
        grace_seconds = config.lifecycle.grace_period_seconds,
        "configuration loaded"
    );

    // ── Build the serialized event pipeline ─────────────
    let ct = CancellationToken::new();
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let handle = CoordinatorHandle::new(tx.clone());

    let supervisor = ProcessSupervisor::new(Arc::clone(&config), tx.clone());
    let poller_handle = supervisor.spawn_exit_poller(ct.clone());

    let coordinator =
        LifecycleCoordinator::new(Arc::clone(&config), supervisor, rx, tx, ct.clone());
    let coordinator_handle = coordinator.spawn();
    info!("lifecycle coordinator started");

    // ── Start sweep tickers ─────────────────────────────
    let gc_handle = gc::spawn_gc_task(
        handle.clone(),
        Duration::from_secs(config.lifecycle.gc_interval_seconds),
        ct.clone(),
    );
    let health_handle = health::spawn_health_task(
        handle.clone(),
        Duration::from_secs(config.lifecycle.health_interval_seconds),
        ct.clone(),
    );
    info!("gc and health tickers started");

    // ── Start HTTP ingress / control API ────────────────
    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(handle, config.http_port, http_ct).await {
            error!(%err, "http api failed");
        }
    });

    info!("room-warden ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // The coordinator kills every remaining agent on its way out.
    let _ = tokio::join!(
        coordinator_handle,
        poller_handle,
        gc_handle,
        health_handle,
        http_handle
    );
    info!("room-warden shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
