#![forbid(unsafe_code)]

//! `outreach-queue`: dispatcher daemon.
//!
//! Loads configuration, opens the queue database, recovers actions
//! interrupted by a previous crash, then runs the dispatcher loop and the
//! retention task until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use outreach_queue::app::Services;
use outreach_queue::config::GlobalConfig;
use outreach_queue::persistence::{db, retention};
use outreach_queue::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "outreach-queue", about = "Outbound action queue dispatcher", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run a single dispatch pass and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("outreach-queue bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if config.transport.is_none() {
        return Err(AppError::Config(
            "a [transport] section is required to run the dispatcher".into(),
        ));
    }
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path).await?);
    info!(path = %config.db_path.display(), "database connected");

    let services = Services::from_config(Arc::clone(&config), Arc::clone(&db))?;

    // ── Recover actions left running by a crash ─────────
    let recovered = services.store.recover_interrupted().await?;
    if recovered > 0 {
        warn!(recovered, "recovered interrupted actions on startup");
    }

    if args.once {
        let report = services.dispatcher.run_once().await?;
        info!(?report, "single pass complete");
        return Ok(());
    }

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention_days, ct.clone());
    let dispatcher_handle = Arc::clone(&services.dispatcher).spawn(ct.clone());
    info!(
        poll_interval_seconds = config.dispatcher.poll_interval_seconds,
        worker = services.dispatcher.worker_id(),
        "dispatcher started"
    );

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let (dispatcher_result, retention_result) = tokio::join!(dispatcher_handle, retention_handle);
    if let Err(err) = dispatcher_result {
        warn!(%err, "dispatcher task ended abnormally");
    }
    if let Err(err) = retention_result {
        warn!(%err, "retention task ended abnormally");
    }
    info!("outreach-queue shut down");

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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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
