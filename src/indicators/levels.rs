// =============================================================================
// Price levels — prior extremes and the swing-low proxy
// =============================================================================

use crate::market_data::Candle;

/// Highest high over the `n` closed bars before the current one (the current
/// bar is excluded). `None` until `n + 1` bars exist.
pub fn prior_high(candles: &[Candle], n: usize) -> Option<f64> {
    if n == 0 || candles.len() < n + 1 {
        return None;
    }
    let window = &candles[candles.len() - 1 - n..candles.len() - 1];
    let v = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    v.is_finite().then_some(v)
}

/// Lowest low over the `n` closed bars before the current one.
pub fn prior_low(candles: &[Candle], n: usize) -> Option<f64> {
    if n == 0 || candles.len() < n + 1 {
        return None;
    }
    let window = &candles[candles.len() - 1 - n..candles.len() - 1];
    let v = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    v.is_finite().then_some(v)
}

/// Swing-low proxy: lowest low over the last `n` closed bars, current bar
/// included.
pub fn swing_low(candles: &[Candle], n: usize) -> Option<f64> {
    if n == 0 || candles.is_empty() {
        return None;
    }
    let start = candles.len().saturating_sub(n);
    let v = candles[start..].iter().map(|c| c.low).fold(f64::MAX, f64::min);
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandleSource, SessionTag, Timeframe};

    fn candle(i: i64, high: f64, low: f64) -> Candle {
        Candle {
            symbol: "SPY".into(),
            timeframe: Timeframe::M15,
            start_ts: i * 900_000,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 100.0,
            session: SessionTag::Rth,
            is_closed: true,
            source: CandleSource::Rest,
        }
    }

    #[test]
    fn prior_extremes_exclude_current_bar() {
        let mut candles: Vec<Candle> = (0..20).map(|i| candle(i, 105.0, 95.0)).collect();
        // Current bar spikes beyond both extremes; it must not count.
        candles.push(candle(20, 120.0, 80.0));
        assert_eq!(prior_high(&candles, 20), Some(105.0));
        assert_eq!(prior_low(&candles, 20), Some(95.0));
    }

    #[test]
    fn swing_low_includes_current_bar() {
        let mut candles: Vec<Candle> = (0..20).map(|i| candle(i, 105.0, 95.0)).collect();
        candles.push(candle(20, 104.0, 90.0));
        assert_eq!(swing_low(&candles, 20), Some(90.0));
    }

    #[test]
    fn insufficient_history_is_none() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 105.0, 95.0)).collect();
        // Exactly 20 bars: prior extremes need 21.
        assert!(prior_high(&candles, 20).is_none());
        assert!(prior_low(&candles, 20).is_none());
        // swing_low works from one bar.
        assert!(swing_low(&candles, 20).is_some());
    }
}
