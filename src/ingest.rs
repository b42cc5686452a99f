// =============================================================================
// Ingest loops — WS tick ingest and REST candle refresh
// =============================================================================
//
// Two long-lived tasks spawned from main:
//
//   * run_ws_ingest owns the CandleBuilder (single writer for 1m/5m/AGG
//     series) and feeds builder output into the store. Disconnects trigger
//     exponential backoff with full jitter (base 1s, cap 30s); a 30s read
//     idle also forces a reconnect. Ticks lost during an outage are not
//     recovered; the affected bars simply go gap-bearing and stale.
//
//   * run_rest_refresh periodically pulls closed 15m/1h/4h/1d bars for the
//     tracked symbols and writes them as authoritative REST candles
//     (replacing in place where a slot already exists).
//
// Both honour the shutdown watch channel.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::EngineError;
use crate::market_data::CandleBuilder;
use crate::provider::MarketDataProvider;
use crate::types::Timeframe;

/// Reconnect backoff base and cap.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// A WS read idle longer than this forces a reconnect.
const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Full-jitter delay for the given attempt number.
fn backoff_delay(attempt: u32) -> Duration {
    let ceiling = BACKOFF_CAP.min(BACKOFF_BASE * 2u32.saturating_pow(attempt));
    rand::thread_rng().gen_range(Duration::ZERO..=ceiling)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Apply one builder output batch to the store, absorbing rejects.
fn apply_events(state: &AppState, events: Vec<crate::market_data::Candle>, now_ms: i64) {
    for candle in events {
        if let Err(e) = state.store.append(candle, now_ms) {
            state.ingest_stats.record_drop(&e);
            match e {
                EngineError::InternalInvariantViolation(_) => {
                    warn!(error = %e, "append refused by quarantined series")
                }
                _ => debug!(kind = e.kind(), error = %e, "candle rejected by store"),
            }
        }
    }
}

/// WS ingest task. Returns when the shutdown signal fires.
pub async fn run_ws_ingest(
    provider: Arc<dyn MarketDataProvider>,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let symbols = state.config.all_symbols();
    let mut builder = CandleBuilder::new(state.ingest_stats.clone());
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut stream = match provider.stream_ticks(&symbols).await {
            Ok(stream) => {
                info!(attempt, "tick stream established");
                attempt = 0;
                stream
            }
            Err(e) => {
                let delay = backoff_delay(attempt);
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "tick stream connect failed");
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        // Read until disconnect, idle timeout, or shutdown.
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("WS ingest shutting down");
                    return;
                }
                next = tokio::time::timeout(WS_IDLE_TIMEOUT, futures_util::StreamExt::next(&mut stream)) => {
                    match next {
                        Ok(Some(tick)) => {
                            let wall = now_ms();
                            let events = builder.on_tick(&tick, wall);
                            // Ticks may run a few seconds ahead of the local
                            // clock; a bar they close is still closed.
                            apply_events(&state, events, wall.max(tick.t_ms));
                        }
                        Ok(None) => {
                            warn!("tick stream ended; reconnecting");
                            break;
                        }
                        Err(_) => {
                            warn!(idle_s = WS_IDLE_TIMEOUT.as_secs(), "tick stream idle; reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// REST refresh task. Fetches the higher-timeframe closed bars on a fixed
/// cadence (first pass immediately, so a restarted process backfills as soon
/// as the provider answers).
pub async fn run_rest_refresh(
    provider: Arc<dyn MarketDataProvider>,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let symbols = state.config.all_symbols();
    let mut interval =
        tokio::time::interval(Duration::from_millis(state.config.refresh_interval_ms.max(1_000)));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("REST refresh shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        for symbol in &symbols {
            for tf in Timeframe::REST_REFRESHED {
                let to_ms = now_ms();
                let span = tf.ms() * state.config.retention.for_tf(tf) as i64;
                let from_ms = to_ms - span;

                match provider.fetch_candles(symbol, tf, from_ms, to_ms).await {
                    Ok(candles) => {
                        let count = candles.len();
                        for candle in candles {
                            if !candle.is_closed {
                                // Providers must not hand us open bars; drop
                                // defensively and count it.
                                state.ingest_stats.record_drop(&EngineError::MalformedCandle(
                                    "open bar from REST fetch".into(),
                                ));
                                continue;
                            }
                            apply_events(&state, vec![candle], now_ms());
                        }
                        debug!(symbol = %symbol, timeframe = %tf, count, "REST refresh applied");
                    }
                    Err(e) => {
                        // Logged and retried on the next cadence; never
                        // surfaced to a request.
                        warn!(symbol = %symbol, timeframe = %tf, error = %e, "REST refresh failed");
                    }
                }
            }
        }
    }
}
