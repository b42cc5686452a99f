// =============================================================================
// CandleBuilder — tick → 1m → 5m construction, forming 15m view
// =============================================================================
//
// Owned exclusively by the WS ingest task (single writer per symbol), so it
// needs no interior locking. Malformed input never panics the builder;
// invalid ticks are counted and dropped with a debug-level diagnostic.
//
// The 1m → 5m and 1m → forming-15m paths are pure reductions over the recent
// 1m window rather than shared mutable accumulators.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::types::{CandleSource, SessionTag, Tick, Timeframe};

use super::candle::Candle;

/// Ticks more than this far in the future are dropped.
const MAX_FUTURE_SKEW_MS: i64 = 5_000;

/// Closed 1m bars kept per symbol for the 5m/forming-15m reductions.
const RECENT_1M_CAPACITY: usize = 16;

// =============================================================================
// Ingest diagnostics
// =============================================================================

/// Counters for absorbed ingest-layer errors. Exposed via /health.
#[derive(Default)]
pub struct IngestStats {
    pub ticks_accepted: AtomicU64,
    pub ticks_dropped_malformed: AtomicU64,
    pub ticks_dropped_stale: AtomicU64,
    pub candles_dropped: AtomicU64,
    pub gap_slots: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub ticks_accepted: u64,
    pub ticks_dropped_malformed: u64,
    pub ticks_dropped_stale: u64,
    pub candles_dropped: u64,
    pub gap_slots: u64,
}

impl IngestStats {
    pub fn record_drop(&self, err: &EngineError) {
        match err {
            EngineError::StaleData(_) => {
                self.ticks_dropped_stale.fetch_add(1, Ordering::Relaxed);
            }
            EngineError::MalformedCandle(_) => {
                self.candles_dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.ticks_dropped_malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            ticks_accepted: self.ticks_accepted.load(Ordering::Relaxed),
            ticks_dropped_malformed: self.ticks_dropped_malformed.load(Ordering::Relaxed),
            ticks_dropped_stale: self.ticks_dropped_stale.load(Ordering::Relaxed),
            candles_dropped: self.candles_dropped.load(Ordering::Relaxed),
            gap_slots: self.gap_slots.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// The open 1m bar plus per-session tick tallies for the majority tag.
struct OpenBar {
    candle: Candle,
    rth: u32,
    ext: u32,
    unknown: u32,
}

impl OpenBar {
    fn tally(&mut self, tag: SessionTag) {
        match tag {
            SessionTag::Rth => self.rth += 1,
            SessionTag::Ext => self.ext += 1,
            SessionTag::Unknown => self.unknown += 1,
        }
    }

    fn majority_tag(&self) -> SessionTag {
        majority3(self.rth, self.ext, self.unknown)
    }
}

fn majority3(rth: u32, ext: u32, unknown: u32) -> SessionTag {
    if rth > ext && rth > unknown {
        SessionTag::Rth
    } else if ext > rth && ext > unknown {
        SessionTag::Ext
    } else if unknown > rth && unknown > ext {
        SessionTag::Unknown
    } else {
        SessionTag::Unknown
    }
}

#[derive(Default)]
struct SymbolAccum {
    open: Option<OpenBar>,
    recent_1m: VecDeque<Candle>,
}

pub struct CandleBuilder {
    accums: HashMap<String, SymbolAccum>,
    stats: Arc<IngestStats>,
    forming_15m_enabled: bool,
}

impl CandleBuilder {
    pub fn new(stats: Arc<IngestStats>) -> Self {
        Self {
            accums: HashMap::new(),
            stats,
            forming_15m_enabled: true,
        }
    }

    /// Feed one tick. Returns candle updates to append to the store, in
    /// order: closed 1m, then a closed 5m when the tick completed a 5m
    /// window, then the recomputed forming 15m bar.
    pub fn on_tick(&mut self, tick: &Tick, now_ms: i64) -> Vec<Candle> {
        if let Err(e) = self.validate(tick, now_ms) {
            self.stats.record_drop(&e);
            debug!(error = %e, "tick dropped");
            return Vec::new();
        }

        self.stats.ticks_accepted.fetch_add(1, Ordering::Relaxed);
        let bucket = Timeframe::M1.bucket(tick.t_ms);
        let accum = self.accums.entry(tick.symbol.clone()).or_default();

        let mut events = Vec::new();
        match &mut accum.open {
            None => {
                accum.open = Some(new_open_bar(tick, bucket));
            }
            Some(open) if bucket == open.candle.start_ts => {
                let c = &mut open.candle;
                c.high = c.high.max(tick.price);
                c.low = c.low.min(tick.price);
                c.close = tick.price;
                c.volume += tick.size;
                open.tally(tick.session);
            }
            Some(open) if bucket > open.candle.start_ts => {
                // Bucket advanced: close the prior bar, account for skipped
                // slots, and open a new one. No synthetic bars for the gap.
                let mut closed = open.candle.clone();
                closed.is_closed = true;
                closed.session = open.majority_tag();

                let skipped = (bucket - closed.start_ts) / Timeframe::M1.ms() - 1;
                if skipped > 0 {
                    self.stats
                        .gap_slots
                        .fetch_add(skipped as u64, Ordering::Relaxed);
                    debug!(symbol = %tick.symbol, skipped, "1m gap observed");
                }

                accum.recent_1m.push_back(closed.clone());
                while accum.recent_1m.len() > RECENT_1M_CAPACITY {
                    accum.recent_1m.pop_front();
                }
                events.push(closed.clone());

                if let Some(five) = reduce_5m(&accum.recent_1m, &closed) {
                    events.push(five);
                }
                if self.forming_15m_enabled {
                    if let Some(fifteen) = reduce_forming_15m(&accum.recent_1m, &closed) {
                        events.push(fifteen);
                    }
                }

                accum.open = Some(new_open_bar(tick, bucket));
            }
            Some(_) => {
                // Tick for an already-closed earlier bucket.
                self.stats
                    .record_drop(&EngineError::StaleData("tick behind open bar".into()));
            }
        }

        events
    }

    fn validate(&self, tick: &Tick, now_ms: i64) -> Result<(), EngineError> {
        if tick.symbol.is_empty() {
            return Err(EngineError::MalformedTick("missing symbol".into()));
        }
        if !tick.price.is_finite() || tick.price <= 0.0 {
            return Err(EngineError::MalformedTick(format!(
                "non-positive price {}",
                tick.price
            )));
        }
        if !tick.size.is_finite() || tick.size < 0.0 {
            return Err(EngineError::MalformedTick(format!(
                "negative size {}",
                tick.size
            )));
        }
        if tick.t_ms > now_ms + MAX_FUTURE_SKEW_MS {
            return Err(EngineError::MalformedTick(format!(
                "t_ms {} more than {}ms in the future",
                tick.t_ms, MAX_FUTURE_SKEW_MS
            )));
        }
        if let Some(accum) = self.accums.get(&tick.symbol) {
            if let Some(open) = &accum.open {
                if tick.t_ms < open.candle.start_ts - Timeframe::M1.ms() {
                    return Err(EngineError::StaleData(format!(
                        "t_ms {} older than open bar window",
                        tick.t_ms
                    )));
                }
            }
        }
        Ok(())
    }
}

fn new_open_bar(tick: &Tick, bucket: i64) -> OpenBar {
    let mut open = OpenBar {
        candle: Candle {
            symbol: tick.symbol.clone(),
            timeframe: Timeframe::M1,
            start_ts: bucket,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.size,
            session: tick.session,
            is_closed: false,
            source: CandleSource::Ws,
        },
        rth: 0,
        ext: 0,
        unknown: 0,
    };
    open.tally(tick.session);
    open
}

/// Reduce the five 1m bars of a completed 5m window into a closed 5m candle.
/// Returns `None` unless `closed` is the final 1m bar of its window and all
/// five constituents are present (a missing constituent leaves a 5m gap).
fn reduce_5m(recent_1m: &VecDeque<Candle>, closed: &Candle) -> Option<Candle> {
    let window_start = Timeframe::M5.bucket(closed.start_ts);
    if closed.start_ts != window_start + 4 * Timeframe::M1.ms() {
        return None;
    }

    let mut constituents = Vec::with_capacity(5);
    for k in 0..5 {
        let want = window_start + k * Timeframe::M1.ms();
        let bar = recent_1m.iter().rev().find(|c| c.start_ts == want)?;
        constituents.push(bar);
    }

    Some(reduce_window(
        &constituents,
        Timeframe::M5,
        window_start,
        true,
    ))
}

/// Recompute the in-progress 15m bar from the consecutive 1m bars ending at
/// the bucket that just closed.
fn reduce_forming_15m(recent_1m: &VecDeque<Candle>, closed: &Candle) -> Option<Candle> {
    let window_start = Timeframe::M15.bucket(closed.start_ts);

    let mut constituents: Vec<&Candle> = Vec::with_capacity(15);
    let mut want = closed.start_ts;
    for bar in recent_1m.iter().rev() {
        if bar.start_ts != want || bar.start_ts < window_start {
            break;
        }
        constituents.push(bar);
        want -= Timeframe::M1.ms();
    }
    if constituents.is_empty() {
        return None;
    }
    constituents.reverse();

    Some(reduce_window(
        &constituents,
        Timeframe::M15,
        window_start,
        false,
    ))
}

fn reduce_window(
    constituents: &[&Candle],
    tf: Timeframe,
    window_start: i64,
    is_closed: bool,
) -> Candle {
    let first = constituents[0];
    let last = constituents[constituents.len() - 1];

    let mut rth = 0u32;
    let mut ext = 0u32;
    let mut unknown = 0u32;
    for c in constituents {
        match c.session {
            SessionTag::Rth => rth += 1,
            SessionTag::Ext => ext += 1,
            SessionTag::Unknown => unknown += 1,
        }
    }

    Candle {
        symbol: first.symbol.clone(),
        timeframe: tf,
        start_ts: window_start,
        open: first.open,
        high: constituents.iter().map(|c| c.high).fold(f64::MIN, f64::max),
        low: constituents.iter().map(|c| c.low).fold(f64::MAX, f64::min),
        close: last.close,
        volume: constituents.iter().map(|c| c.volume).sum(),
        session: majority3(rth, ext, unknown),
        is_closed,
        source: CandleSource::Agg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_400_000; // minute-aligned; also 5m/15m-aligned

    fn tick(t_ms: i64, price: f64, size: f64) -> Tick {
        Tick {
            symbol: "SPY".into(),
            t_ms,
            price,
            size,
            session: SessionTag::Rth,
        }
    }

    fn builder() -> CandleBuilder {
        CandleBuilder::new(Arc::new(IngestStats::default()))
    }

    #[test]
    fn single_minute_roundtrip() {
        let mut b = builder();
        let prices = [100.0, 101.5, 99.0, 100.5];
        for (i, p) in prices.iter().enumerate() {
            let events = b.on_tick(&tick(T0 + i as i64 * 10_000, *p, 10.0), T0 + 60_000);
            assert!(events.is_empty());
        }

        // A tick in the next minute closes the bar (and recomputes the
        // forming 15m view).
        let events = b.on_tick(&tick(T0 + 60_000, 100.7, 5.0), T0 + 61_000);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].timeframe, Timeframe::M15);
        let c = &events[0];
        assert!(c.is_closed);
        assert_eq!(c.start_ts, T0);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.close, 100.5);
        assert_eq!(c.high, 101.5);
        assert_eq!(c.low, 99.0);
        assert!((c.volume - 40.0).abs() < 1e-12);
        assert_eq!(c.session, SessionTag::Rth);
        assert_eq!(c.source, CandleSource::Ws);
    }

    #[test]
    fn five_minute_aggregation() {
        let mut b = builder();
        // One tick per minute for 6 minutes; the 6th closes minute 5 and
        // completes the first 5m window.
        for i in 0..6_i64 {
            let events = b.on_tick(&tick(T0 + i * 60_000, 100.0 + i as f64, 10.0), T0 + (i + 1) * 60_000);
            if i == 5 {
                // closed 1m for minute 4, closed 5m, forming 15m
                assert_eq!(events.len(), 3);
                let five = &events[1];
                assert_eq!(five.timeframe, Timeframe::M5);
                assert!(five.is_closed);
                assert_eq!(five.start_ts, T0);
                assert_eq!(five.open, 100.0);
                assert_eq!(five.close, 104.0);
                assert_eq!(five.high, 104.0);
                assert_eq!(five.low, 100.0);
                assert!((five.volume - 50.0).abs() < 1e-12);
                assert_eq!(five.source, CandleSource::Agg);
            }
        }
    }

    #[test]
    fn gap_suppresses_five_minute_bar() {
        let mut b = builder();
        // Minutes 0,1,2 then skip 3, then 4 and 5: window incomplete.
        for i in [0_i64, 1, 2, 4, 5] {
            let events = b.on_tick(&tick(T0 + i * 60_000, 100.0, 10.0), T0 + (i + 1) * 60_000);
            // No 5m bar in any event batch.
            assert!(events.iter().all(|c| c.timeframe != Timeframe::M5));
        }
        let stats = b.stats.snapshot();
        assert_eq!(stats.gap_slots, 1);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let one_minute: Vec<Candle> = (0..5_i64)
            .map(|i| Candle {
                symbol: "SPY".into(),
                timeframe: Timeframe::M1,
                start_ts: T0 + i * 60_000,
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                volume: 10.0,
                session: SessionTag::Rth,
                is_closed: true,
                source: CandleSource::Ws,
            })
            .collect();
        let ring: VecDeque<Candle> = one_minute.iter().cloned().collect();
        let last = one_minute.last().unwrap();

        let a = reduce_5m(&ring, last).unwrap();
        let b = reduce_5m(&ring, last).unwrap();
        assert_eq!(a.open, b.open);
        assert_eq!(a.high, b.high);
        assert_eq!(a.low, b.low);
        assert_eq!(a.close, b.close);
        assert_eq!(a.volume, b.volume);
        assert_eq!(a.start_ts, b.start_ts);
    }

    #[test]
    fn forming_15m_recomputed_on_each_close() {
        let mut b = builder();
        let mut last_forming = None;
        for i in 0..4_i64 {
            let events = b.on_tick(&tick(T0 + i * 60_000, 100.0 + i as f64, 10.0), T0 + (i + 1) * 60_000);
            if let Some(f) = events.iter().find(|c| c.timeframe == Timeframe::M15) {
                assert!(!f.is_closed);
                assert_eq!(f.source, CandleSource::Agg);
                assert_eq!(f.start_ts, Timeframe::M15.bucket(T0));
                last_forming = Some(f.clone());
            }
        }
        // After closing minutes 0..=2, the forming bar covers three bars.
        let f = last_forming.expect("forming 15m emitted");
        assert_eq!(f.open, 100.0);
        assert_eq!(f.close, 102.0);
        assert!((f.volume - 30.0).abs() < 1e-12);
    }

    #[test]
    fn malformed_ticks_dropped_and_counted() {
        let mut b = builder();
        let now = T0 + 60_000;

        assert!(b.on_tick(&tick(T0, -5.0, 10.0), now).is_empty());
        assert!(b.on_tick(&tick(T0, f64::NAN, 10.0), now).is_empty());
        assert!(b.on_tick(&tick(T0, 100.0, -1.0), now).is_empty());
        let mut no_symbol = tick(T0, 100.0, 1.0);
        no_symbol.symbol.clear();
        assert!(b.on_tick(&no_symbol, now).is_empty());
        // More than 5s in the future.
        assert!(b.on_tick(&tick(now + 6_000, 100.0, 1.0), now).is_empty());

        let stats = b.stats.snapshot();
        assert_eq!(stats.ticks_dropped_malformed, 5);
        assert_eq!(stats.ticks_accepted, 0);
    }

    #[test]
    fn stale_tick_dropped() {
        let mut b = builder();
        b.on_tick(&tick(T0 + 5 * 60_000, 100.0, 1.0), T0 + 5 * 60_000 + 1_000);
        // More than one minute behind the open bar.
        let events = b.on_tick(&tick(T0 + 3 * 60_000, 99.0, 1.0), T0 + 5 * 60_000 + 2_000);
        assert!(events.is_empty());
        assert_eq!(b.stats.snapshot().ticks_dropped_stale, 1);
    }

    #[test]
    fn out_of_order_within_minute_accepted() {
        let mut b = builder();
        let now = T0 + 60_000;
        b.on_tick(&tick(T0 + 30_000, 100.0, 1.0), now);
        // Earlier timestamp, same bucket: merged into the open bar.
        b.on_tick(&tick(T0 + 10_000, 99.0, 1.0), now);
        let events = b.on_tick(&tick(T0 + 60_000, 100.5, 1.0), now + 1_000);
        let c = &events[0];
        assert_eq!(c.low, 99.0);
        // Close follows arrival order, not timestamp order.
        assert_eq!(c.close, 99.0);
    }

    #[test]
    fn session_majority_tag() {
        let mut b = builder();
        let now = T0 + 60_000;
        let mut t1 = tick(T0, 100.0, 1.0);
        t1.session = SessionTag::Ext;
        b.on_tick(&t1, now);
        let mut t2 = tick(T0 + 10_000, 100.0, 1.0);
        t2.session = SessionTag::Rth;
        b.on_tick(&t2, now);
        let mut t3 = tick(T0 + 20_000, 100.0, 1.0);
        t3.session = SessionTag::Rth;
        b.on_tick(&t3, now);

        let events = b.on_tick(&tick(T0 + 60_000, 100.0, 1.0), now + 1_000);
        assert_eq!(events[0].session, SessionTag::Rth);
    }
}
