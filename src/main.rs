// =============================================================================
// MomoScope — Main Entry Point
// =============================================================================
//
// Wiring order: config from env, shared state, provider adapter, then the
// three concurrent activities: WS tick ingest, REST candle refresh, and the
// HTTP API. Requests only ever read the store.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod error;
mod indicators;
mod ingest;
mod market_data;
mod provider;
mod scoring;
mod tape;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        provider = %config.provider,
        symbols = ?config.ws_symbols,
        primary = ?config.primary_ticker,
        refresh_interval_ms = config.refresh_interval_ms,
        "MomoScope starting"
    );

    // ── 2. Shared state & provider adapter ───────────────────────────────
    let state = Arc::new(AppState::new(config));
    let provider = provider::build(&state.config).context("provider selection failed")?;

    // ── 3. Shutdown signal ───────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 4. WS ingest ─────────────────────────────────────────────────────
    let ws_provider = provider.clone();
    let ws_state = state.clone();
    let ws_shutdown = shutdown_rx.clone();
    let ws_task = tokio::spawn(async move {
        ingest::run_ws_ingest(ws_provider, ws_state, ws_shutdown).await;
    });

    // ── 5. REST refresh ──────────────────────────────────────────────────
    let rest_provider = provider.clone();
    let rest_state = state.clone();
    let rest_shutdown = shutdown_rx.clone();
    let rest_task = tokio::spawn(async move {
        ingest::run_rest_refresh(rest_provider, rest_state, rest_shutdown).await;
    });

    // ── 6. HTTP API ──────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let mut api_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = api_shutdown.changed().await;
    });
    let api_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            warn!(error = %e, "API server exited with error");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");
    let _ = shutdown_tx.send(true);

    // Bounded grace period for in-flight work.
    let drain = async {
        let _ = ws_task.await;
        let _ = rest_task.await;
        let _ = api_task.await;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(5), drain)
        .await
        .is_err()
    {
        warn!("grace period elapsed; exiting with tasks still running");
    }

    info!("MomoScope shut down complete.");
    Ok(())
}
