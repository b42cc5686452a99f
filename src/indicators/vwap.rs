// =============================================================================
// Session VWAP — RTH-anchored volume-weighted average price
// =============================================================================
//
// Cumulative sum of typical_price * volume over the RTH-tagged 5m candles of
// the current trading session, divided by cumulative volume. RTH never
// crosses UTC midnight, so "current session" is the set of RTH bars sharing
// the newest bar's UTC day.
//
// Returns `None` when the session cannot be determined or no RTH candles are
// present; callers fall back to EMA20(5m) as the anchor.
// =============================================================================

use crate::market_data::Candle;
use crate::types::SessionTag;

const DAY_MS: i64 = 86_400_000;

/// Session VWAP over closed 5m candles (oldest first).
pub fn session_vwap(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let session_day = last.start_ts.div_euclid(DAY_MS);

    let mut pv_sum = 0.0;
    let mut vol_sum = 0.0;
    for c in candles {
        if c.session != SessionTag::Rth {
            continue;
        }
        if c.start_ts.div_euclid(DAY_MS) != session_day {
            continue;
        }
        pv_sum += c.typical_price() * c.volume;
        vol_sum += c.volume;
    }

    if vol_sum <= 0.0 {
        return None;
    }
    let vwap = pv_sum / vol_sum;
    vwap.is_finite().then_some(vwap)
}
