// =============================================================================
// CandleStore — thread-safe ring buffer per (symbol, timeframe)
// =============================================================================
//
// The single source of truth for indicator and scoring reads. Exactly one
// writer exists per series (the WS ingest task for 1m/5m/AGG, the REST
// refresh task for 15m and above); readers are unbounded and clone series
// heads under one read-lock acquisition so a request observes a consistent
// snapshot.
//
// A series that trips an internal invariant is quarantined: no further
// appends are accepted until restart and requests against it surface an
// internal error.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::Retention;
use crate::error::EngineError;
use crate::types::{CandleSource, Timeframe};

use super::candle::{Candle, CandleKey};

/// Freshness classification of a series relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    #[serde(rename = "fresh")]
    Fresh,
    #[serde(rename = "stale")]
    Stale,
    #[serde(rename = "missing")]
    Missing,
}

/// One candle series: closed bars in FIFO order plus at most one forming bar.
#[derive(Default)]
struct Series {
    closed: VecDeque<Candle>,
    forming: Option<Candle>,
    quarantined: Option<String>,
}

/// Read-consistent snapshot of everything scoring needs for one symbol.
#[derive(Debug, Clone, Default)]
pub struct TickerView {
    pub per_tf: HashMap<Timeframe, Vec<Candle>>,
    pub forming_15m: Option<Candle>,
    pub freshness: HashMap<Timeframe, Freshness>,
    /// Quarantine reason if any of the symbol's series is quarantined.
    pub quarantined: Option<String>,
}

impl TickerView {
    pub fn closed(&self, tf: Timeframe) -> &[Candle] {
        self.per_tf.get(&tf).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn freshness(&self, tf: Timeframe) -> Freshness {
        self.freshness.get(&tf).copied().unwrap_or(Freshness::Missing)
    }
}

pub struct CandleStore {
    series: RwLock<HashMap<CandleKey, Series>>,
    retention: Retention,
}

impl CandleStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Insert a candle.
    ///
    /// * Closed candles append when `start_ts` exceeds everything retained.
    /// * A closed REST candle matching an existing `start_ts` replaces that
    ///   bar in place (authoritative backfill).
    /// * An open REST candle is rejected (partial REST bars are dropped).
    /// * Open WS/AGG candles upsert the series' forming slot.
    /// * Anything else out of order is rejected as malformed.
    pub fn append(&self, candle: Candle, now_ms: i64) -> Result<(), EngineError> {
        candle.validate(now_ms)?;

        if candle.source == CandleSource::Rest && !candle.is_closed {
            return Err(EngineError::MalformedCandle(format!(
                "{}@{} start={}: partial REST bar",
                candle.symbol, candle.timeframe, candle.start_ts
            )));
        }

        let key = CandleKey::new(candle.symbol.clone(), candle.timeframe);
        let mut map = self.series.write();
        let series = map.entry(key.clone()).or_default();

        if let Some(reason) = &series.quarantined {
            return Err(EngineError::InternalInvariantViolation(format!(
                "{key} is quarantined: {reason}"
            )));
        }

        if !candle.is_closed {
            // Forming bar: replace in place when it is the same bucket or a
            // newer one; never regress.
            match &series.forming {
                Some(existing) if candle.start_ts < existing.start_ts => {
                    return Err(EngineError::MalformedCandle(format!(
                        "{key}: forming bar regression ({} < {})",
                        candle.start_ts, existing.start_ts
                    )));
                }
                _ => series.forming = Some(candle),
            }
            return Ok(());
        }

        let last_start = series.closed.back().map(|c| c.start_ts);
        match last_start {
            None => series.closed.push_back(candle),
            Some(last) if candle.start_ts > last => {
                // Drop a forming bar the closed candle supersedes.
                if let Some(f) = &series.forming {
                    if f.start_ts <= candle.start_ts {
                        series.forming = None;
                    }
                }
                series.closed.push_back(candle);
            }
            Some(_) if candle.source == CandleSource::Rest => {
                // Authoritative backfill: replace the matching bar in place.
                match series
                    .closed
                    .iter_mut()
                    .find(|c| c.start_ts == candle.start_ts)
                {
                    Some(slot) => *slot = candle,
                    None => {
                        return Err(EngineError::MalformedCandle(format!(
                            "{key}: REST bar start={} has no matching slot",
                            candle.start_ts
                        )));
                    }
                }
            }
            Some(last) => {
                return Err(EngineError::MalformedCandle(format!(
                    "{key}: out-of-order append (start={} <= last={last})",
                    candle.start_ts
                )));
            }
        }

        let max = self.retention.for_tf(key.timeframe);
        while series.closed.len() > max {
            series.closed.pop_front();
        }

        // Post-mutation invariant sweep. A strictly-increasing series is
        // guaranteed by construction above; if it ever fails the series is
        // corrupt and must stop accepting writes.
        let monotonic = series
            .closed
            .iter()
            .zip(series.closed.iter().skip(1))
            .all(|(a, b)| a.start_ts < b.start_ts);
        if !monotonic {
            let reason = format!("{key}: series no longer strictly increasing");
            error!(key = %key, "series quarantined");
            series.quarantined = Some(reason.clone());
            return Err(EngineError::InternalInvariantViolation(reason));
        }

        Ok(())
    }

    /// Mark a series as quarantined. Used when a reader detects corrupt state.
    pub fn quarantine(&self, key: &CandleKey, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(key = %key, reason = %reason, "series quarantined by reader");
        let mut map = self.series.write();
        map.entry(key.clone()).or_default().quarantined = Some(reason);
    }

    /// Last up-to-`n` closed candles, newest last.
    pub fn latest(&self, symbol: &str, tf: Timeframe, n: usize) -> Vec<Candle> {
        let map = self.series.read();
        match map.get(&CandleKey::new(symbol, tf)) {
            Some(series) => {
                let start = series.closed.len().saturating_sub(n);
                series.closed.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// The series' forming (not yet closed) bar, if any.
    pub fn forming(&self, symbol: &str, tf: Timeframe) -> Option<Candle> {
        let map = self.series.read();
        map.get(&CandleKey::new(symbol, tf))
            .and_then(|s| s.forming.clone())
    }

    /// Freshness per the policy: fresh when the most recent expected bar is
    /// present (the forming bar covers the current bucket, or the last
    /// closed bar is at most one timeframe-length behind it). Stale when
    /// older, missing when nothing is retained.
    pub fn freshness(&self, symbol: &str, tf: Timeframe, now_ms: i64) -> Freshness {
        let map = self.series.read();
        let Some(series) = map.get(&CandleKey::new(symbol, tf)) else {
            return Freshness::Missing;
        };
        Self::freshness_of(series, tf, now_ms)
    }

    fn freshness_of(series: &Series, tf: Timeframe, now_ms: i64) -> Freshness {
        let current_bucket = tf.bucket(now_ms);

        if let Some(forming) = &series.forming {
            if forming.start_ts == current_bucket {
                return Freshness::Fresh;
            }
        }
        match series.closed.back() {
            Some(last) if last.start_ts >= current_bucket - tf.ms() => Freshness::Fresh,
            Some(_) => Freshness::Stale,
            None => {
                if series.forming.is_some() {
                    Freshness::Stale
                } else {
                    Freshness::Missing
                }
            }
        }
    }

    /// Expected-but-missing `start_ts` values among the last `window`
    /// expected slots, anchored at the newest retained bar.
    pub fn gaps(&self, symbol: &str, tf: Timeframe, window: usize) -> Vec<i64> {
        let map = self.series.read();
        let Some(series) = map.get(&CandleKey::new(symbol, tf)) else {
            return Vec::new();
        };
        let Some(last) = series.closed.back() else {
            return Vec::new();
        };

        let step = tf.ms();
        let first_retained = series.closed.front().map(|c| c.start_ts).unwrap_or(last.start_ts);
        let window_floor = last.start_ts - (window.saturating_sub(1) as i64) * step;
        let floor = window_floor.max(first_retained);

        let present: std::collections::HashSet<i64> =
            series.closed.iter().map(|c| c.start_ts).collect();

        let mut missing = Vec::new();
        let mut ts = floor;
        while ts <= last.start_ts {
            if !present.contains(&ts) {
                missing.push(ts);
            }
            ts += step;
        }
        missing
    }

    /// Whether any candle (closed or forming) was ever ingested for a symbol.
    pub fn has_any_data(&self, symbol: &str) -> bool {
        let map = self.series.read();
        Timeframe::ALL.iter().any(|tf| {
            map.get(&CandleKey::new(symbol, *tf))
                .map(|s| !s.closed.is_empty() || s.forming.is_some())
                .unwrap_or(false)
        })
    }

    /// Build read-consistent views for several symbols under one read lock.
    pub fn views(&self, symbols: &[&str], now_ms: i64) -> HashMap<String, TickerView> {
        let map = self.series.read();
        let mut out = HashMap::with_capacity(symbols.len());

        for &symbol in symbols {
            let mut view = TickerView::default();
            for tf in Timeframe::ALL {
                let key = CandleKey::new(symbol, tf);
                match map.get(&key) {
                    Some(series) => {
                        view.per_tf
                            .insert(tf, series.closed.iter().cloned().collect());
                        view.freshness
                            .insert(tf, Self::freshness_of(series, tf, now_ms));
                        if tf == Timeframe::M15 {
                            view.forming_15m = series.forming.clone();
                        }
                        if view.quarantined.is_none() {
                            view.quarantined = series.quarantined.clone();
                        }
                    }
                    None => {
                        view.per_tf.insert(tf, Vec::new());
                        view.freshness.insert(tf, Freshness::Missing);
                    }
                }
            }
            out.insert(symbol.to_string(), view);
        }
        out
    }
}
