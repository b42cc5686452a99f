// =============================================================================
// Relative Volume
// =============================================================================
//
// RelVol compares the latest closed bar's volume to the mean volume of the
// last 20 bars occupying the same time-of-day slot. When fewer than 20
// same-slot samples are retained, it falls back to the mean of the last 20
// bars outright.
// =============================================================================

use crate::market_data::Candle;

const DAY_MS: i64 = 86_400_000;
const LOOKBACK: usize = 20;

/// RelVol of the newest closed candle (oldest-first input). `None` when
/// there are not enough prior bars for even the fallback mean.
pub fn rel_vol(candles: &[Candle]) -> Option<f64> {
    let (current, history) = candles.split_last()?;
    if history.len() < LOOKBACK {
        return None;
    }

    let slot = current.start_ts.rem_euclid(DAY_MS);
    let same_slot: Vec<f64> = history
        .iter()
        .rev()
        .filter(|c| c.start_ts.rem_euclid(DAY_MS) == slot)
        .take(LOOKBACK)
        .map(|c| c.volume)
        .collect();

    let base: Vec<f64> = if same_slot.len() == LOOKBACK {
        same_slot
    } else {
        history.iter().rev().take(LOOKBACK).map(|c| c.volume).collect()
    };

    let mean = base.iter().sum::<f64>() / base.len() as f64;
    if mean <= 0.0 || !mean.is_finite() {
        return None;
    }
    let rv = current.volume / mean;
    rv.is_finite().then_some(rv)
}

/// Mean dollar volume (close * volume) of the last `n` closed candles.
pub fn avg_dollar_volume(candles: &[Candle], n: usize) -> Option<f64> {
    if candles.len() < n || n == 0 {
        return None;
    }
    let tail = &candles[candles.len() - n..];
    let mean = tail.iter().map(|c| c.dollar_volume()).sum::<f64>() / n as f64;
    mean.is_finite().then_some(mean)
}
