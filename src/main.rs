#![forbid(unsafe_code)]

//! `session-fleet` — browser-automation session fleet orchestrator.
//!
//! Bootstraps configuration, loads the persisted session registry, starts
//! the worker supervisor and the HTTP/SSE control surface, and shuts the
//! fleet down gracefully on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use session_fleet::config::GlobalConfig;
use session_fleet::http::{self, ApiState};
use session_fleet::logs::LogHub;
use session_fleet::orchestrator::SessionOrchestrator;
use session_fleet::persistence::{db, session_repo::SessionRepo};
use session_fleet::provision::ProcessProvisioner;
use session_fleet::registry::SessionRegistry;
use session_fleet::worker::supervisor::WorkerSupervisor;
use session_fleet::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-fleet", about = "browser-automation session fleet orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured control-surface port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-fleet bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    info!("configuration loaded");

    // ── Initialize database and registry ────────────────
    let pool = db::connect(&config.db_path()).await?;
    let repo = SessionRepo::new(pool);
    let registry = Arc::new(SessionRegistry::new(repo, config.profiles_dir.clone()));
    let loaded = registry.load().await?;
    info!(sessions = loaded, "registry ready");

    // ── Wire the fleet ──────────────────────────────────
    let ct = CancellationToken::new();
    let hub = Arc::new(LogHub::new(config.log_buffer));
    for session in registry.list().await {
        hub.register(&session.id);
    }

    let supervisor = Arc::new(WorkerSupervisor::new(
        config.worker.clone(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        ct.clone(),
    ));
    let provisioner = Arc::new(ProcessProvisioner::new(
        config.provision.clone(),
        config.provision_timeout(),
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        registry,
        Arc::clone(&supervisor),
        hub,
        provisioner,
        config.grace_timeout(),
        config.sequential_slot_timeout(),
    ));

    // ── Start the control surface ───────────────────────
    let state = ApiState {
        orchestrator: Arc::clone(&orchestrator),
        shutdown: ct.clone(),
    };
    let http_ct = ct.clone();
    let http_port = config.http_port;
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(state, http_port, http_ct).await {
            error!(%err, "control surface failed");
        }
    });

    info!("session-fleet ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    // ── Graceful shutdown: stop the fleet, then the server ──
    let report = orchestrator.stop_all().await;
    if !report.failed.is_empty() {
        error!(failed = report.failed.len(), "some sessions failed to stop cleanly");
    }
    supervisor.shutdown_all(config.grace_timeout()).await;
    ct.cancel();

    let _ = http_handle.await;
    info!(
        stopped = report.stopped.len(),
        "session-fleet shut down"
    );

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
