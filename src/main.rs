#![forbid(unsafe_code)]

//! `agent-bridge`: socket broker binary.
//!
//! Loads configuration, binds the rendezvous socket, prints the ready signal
//! on stdout, and serves front-ends until ctrl-c or SIGTERM. All logging goes
//! to stderr so stdout carries only the ready signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::broker::{Broker, BrokerSettings};
use agent_bridge::engine::cli::CliEngine;
use agent_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Local socket bridge for agent conversations", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rendezvous socket path; overrides the environment and the config file.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(ref path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };

    let mut settings = BrokerSettings::from_config(&config);
    if let Some(socket) = args.socket {
        settings.socket_path = socket;
    }
    info!(host_cli = %config.host_cli, "configuration loaded");

    // ── Bind broker ─────────────────────────────────────
    let engine = Arc::new(CliEngine::from_config(&config));
    let broker = Broker::new(settings, engine);
    let handle = broker.bind()?;

    let ready = serde_json::json!({
        "status": "ready",
        "socketPath": handle.socket_path().display().to_string(),
    });
    println!("{ready}");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    broker.shutdown().await;
    handle.join().await;
    info!("agent-bridge shut down");

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
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

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
