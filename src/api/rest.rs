// =============================================================================
// REST API endpoints — Axum
// =============================================================================
//
// Three read-only endpoints over the shared state. Requests never mutate the
// store; each handler takes its read-consistent view at request start and
// computes indicators, tape, and score from that snapshot.
//
// CORS is configured permissively for development.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::config::REFERENCE_SYMBOLS;
use crate::error::EngineError;
use crate::indicators::{self, IndicatorSet};
use crate::market_data::{Candle, Freshness};
use crate::tape::{self, TapeSnapshot};
use crate::types::Timeframe;

/// Closed candles returned per timeframe in /snapshot.
const SNAPSHOT_CANDLES: usize = 20;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/score", get(score))
        .route("/snapshot", get(snapshot))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Shared request plumbing
// =============================================================================

#[derive(Deserialize)]
struct TickerQuery {
    ticker: Option<String>,
}

fn error_body(status: StatusCode, message: String) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::InsufficientHistory(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Resolve and validate the ticker from the query, falling back to the
/// configured primary.
fn resolve_ticker(state: &AppState, query: &TickerQuery) -> Result<String, EngineError> {
    let raw = query
        .ticker
        .clone()
        .or_else(|| state.config.primary_ticker.clone())
        .ok_or_else(|| EngineError::InvalidRequest("ticker parameter required".into()))?;

    let ticker = raw.trim().to_uppercase();
    let well_formed = !ticker.is_empty()
        && ticker.len() <= 10
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !well_formed {
        return Err(EngineError::InvalidRequest(format!(
            "malformed ticker: {raw:?}"
        )));
    }
    Ok(ticker)
}

// =============================================================================
// GET /health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
        "uptime_s": state.uptime_secs(),
        "ingest": state.ingest_stats.snapshot(),
    }))
}

// =============================================================================
// GET /score?ticker=SYMBOL
// =============================================================================

async fn score(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TickerQuery>,
) -> axum::response::Response {
    let ticker = match resolve_ticker(&state, &query) {
        Ok(t) => t,
        Err(e) => return error_body(status_for(&e), e.to_string()),
    };

    if !state.store.has_any_data(&ticker) {
        let e = EngineError::InsufficientHistory(format!("no data ingested for {ticker}"));
        return error_body(status_for(&e), e.to_string());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let [spy, qqq] = REFERENCE_SYMBOLS;
    let views = state.store.views(&[ticker.as_str(), spy, qqq], now_ms);

    let ticker_view = &views[&ticker];
    if let Some(reason) = &ticker_view.quarantined {
        warn!(ticker = %ticker, reason = %reason, "request hit quarantined series");
        let e = EngineError::InternalInvariantViolation(reason.clone());
        return error_body(status_for(&e), e.to_string());
    }

    let result = state
        .scoring
        .score(ticker_view, &views[spy], &views[qqq], now_ms);
    Json(result).into_response()
}

// =============================================================================
// GET /snapshot?ticker=SYMBOL
// =============================================================================

#[derive(Serialize)]
struct TimeframeSnapshot {
    candles: Vec<Candle>,
    indicators: IndicatorSet,
    freshness: Freshness,
}

#[derive(Serialize)]
struct SnapshotResponse {
    ticker: String,
    per_tf: BTreeMap<&'static str, TimeframeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    forming_15m: Option<Candle>,
    tape: TapeSnapshot,
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TickerQuery>,
) -> axum::response::Response {
    let ticker = match resolve_ticker(&state, &query) {
        Ok(t) => t,
        Err(e) => return error_body(status_for(&e), e.to_string()),
    };

    if !state.store.has_any_data(&ticker) {
        let e = EngineError::InsufficientHistory(format!("no data ingested for {ticker}"));
        return error_body(status_for(&e), e.to_string());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let [spy, qqq] = REFERENCE_SYMBOLS;
    let views = state.store.views(&[ticker.as_str(), spy, qqq], now_ms);
    let ticker_view = &views[&ticker];

    let mut per_tf = BTreeMap::new();
    for tf in Timeframe::ALL {
        let closed = ticker_view.closed(tf);
        let indicators = indicators::compute(tf, closed);
        let start = closed.len().saturating_sub(SNAPSHOT_CANDLES);
        per_tf.insert(
            tf.label(),
            TimeframeSnapshot {
                candles: closed[start..].to_vec(),
                indicators,
                freshness: ticker_view.freshness(tf),
            },
        );
    }

    let tape = tape::derive(
        &views[spy],
        &views[qqq],
        ticker_view.closed(Timeframe::M5),
        now_ms,
    );

    let body = SnapshotResponse {
        ticker,
        per_tf,
        forming_15m: ticker_view.forming_15m.clone(),
        tape,
    };
    Json(body).into_response()
}
