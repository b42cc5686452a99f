// =============================================================================
// Polygon.io adapter — stocks cluster REST aggregates + trade WebSocket
// =============================================================================
//
// SECURITY: the API key is sent as a query parameter / auth frame and is
// never logged.
//
// The aggregates endpoint returns window-start timestamps in epoch ms, which
// map directly onto the engine's aligned `start_ts`. Bars whose window has
// not finished yet are discarded here so only closed candles reach the
// store.
// =============================================================================

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::market_data::Candle;
use crate::types::{CandleSource, SessionTag, Tick, Timeframe};

use super::{MarketDataProvider, TickStream};

const REST_BASE: &str = "https://api.polygon.io";
const WS_URL: &str = "wss://socket.polygon.io/stocks";

/// Regular trading hours, minutes of the UTC day (13:30-20:00 UTC).
/// Approximates the US/Eastern session without a timezone table; during the
/// winter shift the first hour is tagged EXT.
const RTH_START_MIN: i64 = 13 * 60 + 30;
const RTH_END_MIN: i64 = 20 * 60;

pub struct PolygonProvider {
    api_key: String,
    client: reqwest::Client,
}

impl PolygonProvider {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("PolygonProvider initialised (base_url={REST_BASE})");
        Self { api_key, client }
    }
}

/// Map a timeframe onto Polygon's `{multiplier}/{timespan}` range path.
fn range_path(tf: Timeframe) -> (u32, &'static str) {
    match tf {
        Timeframe::M1 => (1, "minute"),
        Timeframe::M5 => (5, "minute"),
        Timeframe::M15 => (15, "minute"),
        Timeframe::H1 => (1, "hour"),
        Timeframe::H4 => (4, "hour"),
        Timeframe::D1 => (1, "day"),
    }
}

/// Session tag for an intraday timestamp.
fn session_for(t_ms: i64) -> SessionTag {
    let minute_of_day = t_ms.rem_euclid(86_400_000) / 60_000;
    if (RTH_START_MIN..RTH_END_MIN).contains(&minute_of_day) {
        SessionTag::Rth
    } else {
        SessionTag::Ext
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Window start, epoch ms UTC.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

fn bar_to_candle(symbol: &str, tf: Timeframe, bar: &AggBar, now_ms: i64) -> Option<Candle> {
    // Polygon anchors 4h/1d windows to the exchange day (US/Eastern), so
    // snap the start onto the engine's UTC bucket grid.
    let start_ts = tf.bucket(bar.t);
    // Only closed windows leave the adapter.
    if start_ts + tf.ms() > now_ms {
        return None;
    }
    let session = match tf {
        Timeframe::H4 | Timeframe::D1 => SessionTag::Unknown,
        _ => session_for(bar.t),
    };
    Some(Candle {
        symbol: symbol.to_string(),
        timeframe: tf,
        start_ts,
        open: bar.o,
        high: bar.h,
        low: bar.l,
        close: bar.c,
        volume: bar.v,
        session,
        is_closed: true,
        source: CandleSource::Rest,
    })
}

/// Parse one WebSocket frame. Polygon batches events into a JSON array;
/// trade events carry `ev == "T"`. Status frames are logged and skipped.
fn parse_trade_frame(text: &str) -> Vec<Tick> {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable WS frame");
            return Vec::new();
        }
    };

    let events = match root.as_array() {
        Some(arr) => arr.as_slice(),
        None => std::slice::from_ref(&root),
    };

    let mut ticks = Vec::new();
    for ev in events {
        match ev.get("ev").and_then(|v| v.as_str()) {
            Some("T") => {
                let (Some(sym), Some(p), Some(t)) = (
                    ev.get("sym").and_then(|v| v.as_str()),
                    ev.get("p").and_then(|v| v.as_f64()),
                    ev.get("t").and_then(|v| v.as_i64()),
                ) else {
                    warn!("trade event missing required fields");
                    continue;
                };
                let size = ev.get("s").and_then(|v| v.as_f64()).unwrap_or(0.0);
                ticks.push(Tick {
                    symbol: sym.to_uppercase(),
                    t_ms: t,
                    price: p,
                    size,
                    session: session_for(t),
                });
            }
            Some("status") => {
                debug!(message = ?ev.get("message"), "WS status frame");
            }
            _ => {}
        }
    }
    ticks
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        let (mult, unit) = range_path(timeframe);
        let url = format!(
            "{REST_BASE}/v2/aggs/ticker/{symbol}/range/{mult}/{unit}/{from_ms}/{to_ms}\
             ?adjusted=true&sort=asc&limit=5000&apiKey={}",
            self.api_key
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("aggs request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::ProviderUnavailable(format!(
                "aggs request returned {status}"
            )));
        }

        let body: AggsResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("aggs body unreadable: {e}")))?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let candles: Vec<Candle> = body
            .results
            .iter()
            .filter_map(|bar| bar_to_candle(symbol, timeframe, bar, now_ms))
            .collect();

        debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            count = candles.len(),
            "fetched closed candles"
        );
        Ok(candles)
    }

    async fn stream_ticks(&self, symbols: &[String]) -> Result<TickStream, EngineError> {
        info!(symbols = ?symbols, "connecting to trade WebSocket");

        let (mut ws, _response) = connect_async(WS_URL)
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("WS connect failed: {e}")))?;

        let auth = serde_json::json!({ "action": "auth", "params": self.api_key });
        ws.send(Message::Text(auth.to_string().into()))
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("WS auth failed: {e}")))?;

        let channels: Vec<String> = symbols.iter().map(|s| format!("T.{s}")).collect();
        let subscribe =
            serde_json::json!({ "action": "subscribe", "params": channels.join(",") });
        ws.send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("WS subscribe failed: {e}")))?;

        info!(count = symbols.len(), "trade WebSocket subscribed");

        let stream = futures_util::stream::unfold(
            (ws, VecDeque::<Tick>::new()),
            |(mut ws, mut pending)| async move {
                loop {
                    if let Some(tick) = pending.pop_front() {
                        return Some((tick, (ws, pending)));
                    }
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            pending.extend(parse_trade_frame(&text));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("trade WebSocket stream ended");
                            return None;
                        }
                        Some(Ok(_)) => {
                            // Ping/Pong/Binary frames; tungstenite answers
                            // pings automatically.
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "trade WebSocket read error");
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
