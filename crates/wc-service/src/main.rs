//! Wager Channel Coordinator Daemon
//!
//! Funds the bot and the player for every game, opens the state channel as
//! initiator and serves join invitations over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wc_core::config::{FundingMode, ServiceConfig};
use wc_core::devnet::DevnetLedger;
use wc_service::funding::{FaucetClient, FundingService};
use wc_service::{api, ServiceEvent, ServiceState};

#[derive(Parser)]
#[command(name = "wc-service")]
#[command(about = "Wager channel coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long, env = "BIND_ADDRESS")]
    bind: Option<String>,

    /// Channel websocket endpoint (overrides config)
    #[arg(long, env = "WS_URL")]
    ws_url: Option<String>,

    /// Funding mode: local or backend (overrides config)
    #[arg(long, env = "FUNDING_MODE")]
    funding_mode: Option<FundingMode>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Wager channel coordinator starting...");

    let mut config = ServiceConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(url) = args.ws_url {
        config.channel.url = url;
    }
    if let Some(mode) = args.funding_mode {
        config.funding.mode = mode;
    }
    config.validate().context("Invalid configuration")?;

    // The in-process devnet is both the ledger and the pre-funded source account
    let ledger = Arc::new(DevnetLedger::new());
    tracing::info!(
        "Using devnet ledger, faucet account {}",
        ledger.faucet_account()
    );

    let mut funding = FundingService::new(config.funding.clone(), ledger.clone());
    if config.funding.mode == FundingMode::Backend {
        let faucet = FaucetClient::new(&config.funding.backend_url, config.funding.request_timeout)
            .context("Failed to build faucet client")?;
        tracing::info!("Funding through faucet at {}", config.funding.backend_url);
        funding = funding.with_backend(Arc::new(faucet));
    }

    let (event_tx, mut event_rx) = mpsc::channel::<ServiceEvent>(256);
    let state = Arc::new(ServiceState::new(
        config.clone(),
        ledger,
        Arc::new(funding),
        event_tx,
    ));

    // Setup signal handlers
    let cancel = state.cancel.clone();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    // Spawn event handler
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_service_event(event);
        }
    });

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!("Starting HTTP API on {}", config.bind_address);

    axum::serve(listener, api::router(Arc::clone(&state)))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;

    tracing::info!(
        "Coordinator shutdown complete ({} channels still pooled)",
        state.pool.len()
    );
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}

/// Handle events reported by lifecycle tasks
fn handle_service_event(event: ServiceEvent) {
    match event {
        ServiceEvent::ChannelOpened { channel_id } => {
            tracing::info!("Channel opened: {}", channel_id);
        }
        ServiceEvent::ChannelClosed { channel_id } => {
            tracing::info!("Channel closed: {}", channel_id);
        }
        ServiceEvent::ChannelReconnected { channel_id } => {
            tracing::info!("Channel reconnected: {}", channel_id);
        }
        ServiceEvent::SessionFailed {
            channel_id,
            kind,
            detail,
        } => {
            tracing::error!("Session on {} failed ({:?}): {}", channel_id, kind, detail);
        }
    }
}
