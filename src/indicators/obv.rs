// =============================================================================
// On-Balance Volume and its normalised slope
// =============================================================================
//
// OBV recurrence:
//   OBV_0 = 0
//   OBV_i = OBV_{i-1} + sign(close_i - close_{i-1}) * volume_i
//
// The slope is the least-squares slope of the last `window` OBV points,
// divided by the mean absolute OBV value over the same window so the result
// is scale-free across instruments.
// =============================================================================

use crate::market_data::Candle;

/// OBV series over closed candles (oldest first). Element 0 is always 0.
pub fn obv_series(candles: &[Candle]) -> Vec<f64> {
    let mut series = Vec::with_capacity(candles.len());
    let mut obv = 0.0;
    for (i, c) in candles.iter().enumerate() {
        if i > 0 {
            let delta = c.close - candles[i - 1].close;
            if delta > 0.0 {
                obv += c.volume;
            } else if delta < 0.0 {
                obv -= c.volume;
            }
        }
        series.push(obv);
    }
    series
}

/// Scale-free OBV slope over the last `window` points.
///
/// `None` when fewer than `window` OBV points exist or the inputs are not
/// finite. A flat all-zero OBV window yields `Some(0.0)`.
pub fn obv_slope(candles: &[Candle], window: usize) -> Option<f64> {
    if window < 2 {
        return None;
    }
    let series = obv_series(candles);
    if series.len() < window {
        return None;
    }
    let tail = &series[series.len() - window..];
    if tail.iter().any(|v| !v.is_finite()) {
        return None;
    }

    // Least squares with x = 0..window-1.
    let n = window as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = tail.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in tail.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    let raw_slope = num / den;

    let mean_abs = tail.iter().map(|v| v.abs()).sum::<f64>() / n;
    if mean_abs == 0.0 {
        return Some(0.0);
    }
    let slope = raw_slope / mean_abs;
    slope.is_finite().then_some(slope)
}
