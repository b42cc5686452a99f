// =============================================================================
// Tape context — market regime from the reference instruments
// =============================================================================
//
// Derives two readings from SPY and QQQ:
//
//   * RiskOff: on 15m, both references close below EMA20 AND each shows
//     three consecutive lower-lows. Unknown when either reference is stale
//     or missing; scoring treats Unknown as a failed tape-gate precondition.
//   * RS_30m: the ticker's 30-minute return minus QQQ's, both measured over
//     six closed 5m bars.
// =============================================================================

use serde::Serialize;

use crate::indicators::ema;
use crate::market_data::{Candle, Freshness, TickerView};
use crate::types::Timeframe;

/// Closed 5m bars spanning ~30 minutes.
const RS_LOOKBACK_BARS: usize = 6;
/// Lower-lows required for the risk-off pattern.
const LOWER_LOW_RUN: usize = 3;

/// Tri-state market risk regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskRegime {
    RiskOn,
    RiskOff,
    Unknown,
}

/// Snapshot handed to scoring and serialized in API responses.
/// `market_risk_off` is `null` when the regime cannot be determined.
#[derive(Debug, Clone, Serialize)]
pub struct TapeSnapshot {
    pub market_risk_off: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rs_30m: Option<f64>,
    pub computed_at_ms: i64,
}

impl TapeSnapshot {
    pub fn regime(&self) -> RiskRegime {
        match self.market_risk_off {
            Some(true) => RiskRegime::RiskOff,
            Some(false) => RiskRegime::RiskOn,
            None => RiskRegime::Unknown,
        }
    }
}

/// Derive the tape snapshot from the reference views and the ticker's 5m
/// series.
pub fn derive(
    spy: &TickerView,
    qqq: &TickerView,
    ticker_5m: &[Candle],
    now_ms: i64,
) -> TapeSnapshot {
    let market_risk_off = match (reference_bearish(spy), reference_bearish(qqq)) {
        (Some(a), Some(b)) => Some(a && b),
        _ => None,
    };

    let rs_30m = match (
        thirty_minute_return(ticker_5m),
        thirty_minute_return(qqq.closed(Timeframe::M5)),
    ) {
        (Some(r_ticker), Some(r_qqq)) => Some(r_ticker - r_qqq),
        _ => None,
    };

    TapeSnapshot {
        market_risk_off,
        rs_30m,
        computed_at_ms: now_ms,
    }
}

/// Whether one reference instrument shows the risk-off pattern on 15m.
/// `None` when its 15m series is stale, missing, or too short to decide.
fn reference_bearish(view: &TickerView) -> Option<bool> {
    if view.freshness(Timeframe::M15) != Freshness::Fresh {
        return None;
    }
    let candles = view.closed(Timeframe::M15);
    if candles.len() < LOWER_LOW_RUN {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema20 = ema::ema(&closes, 20)?;
    let last_close = *closes.last()?;

    let tail = &candles[candles.len() - LOWER_LOW_RUN..];
    let lower_lows = tail.windows(2).all(|w| w[1].low < w[0].low);

    Some(last_close < ema20 && lower_lows)
}

/// `(c_last / c_{last-6}) - 1` over closed 5m bars.
fn thirty_minute_return(candles: &[Candle]) -> Option<f64> {
    if candles.len() < RS_LOOKBACK_BARS + 1 {
        return None;
    }
    let last = candles.last()?.close;
    let base = candles[candles.len() - 1 - RS_LOOKBACK_BARS].close;
    if base <= 0.0 {
        return None;
    }
    let r = last / base - 1.0;
    r.is_finite().then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandleSource, SessionTag};
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_100_000;

    fn candle(tf: Timeframe, start_ts: i64, close: f64, low: f64) -> Candle {
        Candle {
            symbol: "SPY".into(),
            timeframe: tf,
            start_ts,
            open: close,
            high: close + low.max(1.0),
            low,
            close,
            session: SessionTag::Rth,
            volume: 1_000.0,
            is_closed: true,
            source: CandleSource::Rest,
        }
    }

    /// Build a view whose 15m series is fresh and optionally bearish.
    fn reference_view(bearish: bool) -> TickerView {
        let anchor = Timeframe::M15.bucket(NOW) - 900_000;
        let mut candles = Vec::new();
        for i in 0..30_i64 {
            let start = anchor - (29 - i) * 900_000;
            let (close, low) = if bearish {
                // Falling closes below any EMA, strictly lower lows.
                (80.0 - i as f64, 78.0 - i as f64)
            } else {
                (100.0 + i as f64, 99.0 + i as f64)
            };
            candles.push(candle(Timeframe::M15, start, close, low));
        }

        let mut per_tf = HashMap::new();
        per_tf.insert(Timeframe::M15, candles);
        let mut freshness = HashMap::new();
        freshness.insert(Timeframe::M15, Freshness::Fresh);
        TickerView {
            per_tf,
            forming_15m: None,
            freshness,
            quarantined: None,
        }
    }

    fn stale_view() -> TickerView {
        let mut view = reference_view(true);
        view.freshness.insert(Timeframe::M15, Freshness::Stale);
        view
    }

    fn five_min_series(ret_30m: f64) -> Vec<Candle> {
        // Seven bars: base 100, last = 100 * (1 + ret).
        let mut candles = Vec::new();
        for i in 0..7_i64 {
            let close = if i == 6 { 100.0 * (1.0 + ret_30m) } else { 100.0 };
            candles.push(candle(Timeframe::M5, i * 300_000, close, close - 1.0));
        }
        candles
    }

    #[test]
    fn risk_off_when_both_references_bearish() {
        let spy = reference_view(true);
        let qqq = reference_view(true);
        let snap = derive(&spy, &qqq, &[], NOW);
        assert_eq!(snap.market_risk_off, Some(true));
        assert_eq!(snap.regime(), RiskRegime::RiskOff);
    }

    #[test]
    fn risk_on_when_one_reference_holds_up() {
        let spy = reference_view(false);
        let qqq = reference_view(true);
        let snap = derive(&spy, &qqq, &[], NOW);
        assert_eq!(snap.market_risk_off, Some(false));
    }

    #[test]
    fn unknown_when_reference_stale() {
        let spy = stale_view();
        let qqq = reference_view(true);
        let snap = derive(&spy, &qqq, &[], NOW);
        assert_eq!(snap.market_risk_off, None);
        assert_eq!(snap.regime(), RiskRegime::Unknown);
    }

    #[test]
    fn rs_30m_is_return_difference() {
        let mut qqq = reference_view(false);
        qqq.per_tf.insert(Timeframe::M5, five_min_series(0.01));
        let ticker = five_min_series(0.022);
        let snap = derive(&reference_view(false), &qqq, &ticker, NOW);
        let rs = snap.rs_30m.unwrap();
        assert!((rs - 0.012).abs() < 1e-9);
    }

    #[test]
    fn rs_30m_missing_without_history() {
        let qqq = reference_view(false); // no 5m series at all
        let ticker = five_min_series(0.01);
        let snap = derive(&reference_view(false), &qqq, &ticker, NOW);
        assert!(snap.rs_30m.is_none());
    }
}
