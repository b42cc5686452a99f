// =============================================================================
// Average True Range (ATR) — Wilder's smoothing
// =============================================================================
//
// True Range for a bar, given the previous close:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// Wilder smoothing in increment form:
//   ATR_0 = SMA of the first `period` TR values
//   ATR_t = ATR_{t-1} + (TR_t - ATR_{t-1}) / period
//
// Missing until `period + 1` closed bars exist (each TR needs a previous
// close).
// =============================================================================

use crate::market_data::Candle;

/// True range of `bar` against the close of the bar before it.
fn true_range(prev_close: f64, bar: &Candle) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Most recent ATR value over `candles` (oldest first), or `None` when the
/// period is zero, history is insufficient, or a value is non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }

    // `f64::max` ignores NaN operands, so a poisoned bar would otherwise
    // degrade silently into a smaller TR. Refuse the series outright.
    let usable = candles
        .iter()
        .all(|c| c.high.is_finite() && c.low.is_finite() && c.close.is_finite());
    if !usable {
        return None;
    }

    let tr_series: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(pair[0].close, &pair[1]))
        .collect();

    let (seed_window, tail) = tr_series.split_at(period);
    let seed = seed_window.iter().sum::<f64>() / period as f64;

    let smoothed = tail.iter().try_fold(seed, |acc, &tr| {
        let next = acc + (tr - acc) / period as f64;
        next.is_finite().then_some(next)
    })?;

    smoothed.is_finite().then_some(smoothed)
}

/// ATR with the standard 14-bar period.
pub fn atr14(candles: &[Candle]) -> Option<f64> {
    atr(candles, 14)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandleSource, SessionTag, Timeframe};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "SPY".into(),
            timeframe: Timeframe::M5,
            start_ts: i * 300_000,
            open,
            high,
            low,
            close,
            volume: 100.0,
            session: SessionTag::Rth,
            is_closed: true,
            source: CandleSource::Agg,
        }
    }

    #[test]
    fn period_zero_is_none() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 50.0, 52.0, 49.0, 51.0)).collect();
        assert!(atr(&candles, 0).is_none());
    }

    #[test]
    fn missing_until_period_plus_one_closes() {
        let bars = |n: i64| -> Vec<Candle> {
            (0..n).map(|i| candle(i, 50.0, 52.0, 49.0, 51.0)).collect()
        };
        assert!(atr14(&bars(14)).is_none());
        assert!(atr14(&bars(15)).is_some());
    }

    #[test]
    fn steady_range_yields_exact_atr() {
        // Closes drift up by 0.25 per bar inside a constant 4.0 range, so
        // H - L = 4.0 dominates both close-gap terms (2.25 and 1.75) and
        // every TR is exactly 4.0. Seed and smoothing then both equal 4.0.
        let candles: Vec<Candle> = (0..25)
            .map(|i| {
                let mid = 60.0 + 0.25 * i as f64;
                candle(i, mid, mid + 2.0, mid - 2.0, mid)
            })
            .collect();
        let v = atr14(&candles).unwrap();
        assert!((v - 4.0).abs() < 1e-9, "expected ATR of exactly 4.0, got {v}");
    }

    #[test]
    fn overnight_gap_widens_true_range() {
        // Bar 1 gaps down: its own range is only 2.0 but the distance from
        // the prior close (20.0) to its low (13.0) is 7.0, so TR = 7.0.
        let candles = vec![
            candle(0, 19.5, 21.0, 19.0, 20.0),
            candle(1, 14.0, 15.0, 13.0, 14.0),
            candle(2, 14.2, 15.5, 13.5, 15.0),
            candle(3, 15.1, 16.0, 14.0, 15.5),
        ];
        let v = atr(&candles, 3).unwrap();
        // Seed = (7.0 + 2.0 + 2.0) / 3; without the gap term it would be 2.0.
        assert!((v - 11.0 / 3.0).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn rising_volatility_lifts_the_smoothed_value() {
        // Ranges widen from 1.0 to 10.0 over the series; the final ATR must
        // sit above the seed-era ranges but below the latest one.
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let half = 0.5 + 0.25 * i as f64;
                candle(i, 80.0, 80.0 + half, 80.0 - half, 80.0)
            })
            .collect();
        let v = atr(&candles, 5).unwrap();
        assert!(v > 5.0 && v < 10.0, "got {v}");
    }

    #[test]
    fn nan_low_returns_none() {
        let candles = vec![
            candle(0, 30.0, 31.0, 29.0, 30.0),
            candle(1, 30.0, 31.0, f64::NAN, 30.5),
            candle(2, 30.5, 31.5, 29.5, 31.0),
            candle(3, 31.0, 32.0, 30.0, 31.5),
            candle(4, 31.5, 32.5, 30.5, 32.0),
        ];
        assert!(atr(&candles, 3).is_none());
    }
}
