// =============================================================================
// IndicatorEngine — per-timeframe indicator snapshot
// =============================================================================
//
// A pure, deterministic function of the closed-candle series: the same input
// always produces the same IndicatorSet. Insufficient history yields
// `None` for the affected field, never zero.
//
// Which indicators exist on which timeframe:
//   EMA9 / EMA20          1m, 5m, 15m
//   EMA50 / EMA200        15m, 1h, 1d
//   VWAP (RTH session)    5m
//   PriorHigh20/Low20     5m, 15m
//   swing-low proxy       15m
//   ATR14                 5m, 15m
//   OBV slope             5m, 15m
//   RelVol / dollar vol   5m
// =============================================================================

use serde::Serialize;

use crate::market_data::Candle;
use crate::types::Timeframe;

use super::{atr, ema, levels, obv, relvol, vwap};

/// Look-back for the prior-extreme levels.
const LEVEL_LOOKBACK: usize = 20;
/// Number of OBV points in the slope regression.
const OBV_SLOPE_WINDOW: usize = 10;
/// RelVol below this flags thin volume.
const THIN_VOLUME_RELVOL: f64 = 0.5;
/// Bars in the average-dollar-volume window.
const DOLLAR_VOLUME_WINDOW: usize = 20;

/// Snapshot of the named indicators for one `(symbol, timeframe)` series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema9: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema200: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_high_20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_low_20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing_low_20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obv_slope: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_vol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thin_volume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_dollar_vol_20: Option<f64>,
}

impl IndicatorSet {
    /// Anchor price for the no-chase gate and entry planning: session VWAP
    /// when available, EMA20 otherwise.
    pub fn anchor(&self) -> Option<f64> {
        self.vwap.or(self.ema20)
    }
}

/// Compute the indicator set for one timeframe from its closed candles
/// (oldest first).
pub fn compute(tf: Timeframe, candles: &[Candle]) -> IndicatorSet {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut set = IndicatorSet {
        close: closes.last().copied(),
        ..IndicatorSet::default()
    };

    match tf {
        Timeframe::M1 => {
            set.ema9 = ema::ema(&closes, 9);
            set.ema20 = ema::ema(&closes, 20);
        }
        Timeframe::M5 => {
            set.ema9 = ema::ema(&closes, 9);
            set.ema20 = ema::ema(&closes, 20);
            set.vwap = vwap::session_vwap(candles);
            set.prior_high_20 = levels::prior_high(candles, LEVEL_LOOKBACK);
            set.prior_low_20 = levels::prior_low(candles, LEVEL_LOOKBACK);
            set.atr14 = atr::atr14(candles);
            set.obv_slope = obv::obv_slope(candles, OBV_SLOPE_WINDOW);
            set.rel_vol = relvol::rel_vol(candles);
            set.thin_volume = set.rel_vol.map(|rv| rv < THIN_VOLUME_RELVOL);
            set.avg_dollar_vol_20 = relvol::avg_dollar_volume(candles, DOLLAR_VOLUME_WINDOW);
        }
        Timeframe::M15 => {
            set.ema9 = ema::ema(&closes, 9);
            set.ema20 = ema::ema(&closes, 20);
            set.ema50 = ema::ema(&closes, 50);
            set.ema200 = ema::ema(&closes, 200);
            set.prior_high_20 = levels::prior_high(candles, LEVEL_LOOKBACK);
            set.prior_low_20 = levels::prior_low(candles, LEVEL_LOOKBACK);
            set.swing_low_20 = levels::swing_low(candles, LEVEL_LOOKBACK);
            set.atr14 = atr::atr14(candles);
            set.obv_slope = obv::obv_slope(candles, OBV_SLOPE_WINDOW);
        }
        Timeframe::H1 | Timeframe::D1 => {
            set.ema50 = ema::ema(&closes, 50);
            set.ema200 = ema::ema(&closes, 200);
        }
        Timeframe::H4 => {}
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandleSource, SessionTag};

    fn candle(tf: Timeframe, i: i64, close: f64) -> Candle {
        Candle {
            symbol: "SPY".into(),
            timeframe: tf,
            start_ts: i * tf.ms(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            session: SessionTag::Rth,
            is_closed: true,
            source: CandleSource::Agg,
        }
    }

    #[test]
    fn missing_not_zero_on_short_series() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(Timeframe::M5, i, 100.0)).collect();
        let set = compute(Timeframe::M5, &candles);
        assert!(set.ema20.is_none());
        assert!(set.atr14.is_none());
        assert!(set.rel_vol.is_none());
        assert!(set.prior_low_20.is_none());
        assert_eq!(set.close, Some(100.0));
    }

    #[test]
    fn five_minute_set_is_fully_populated_with_history() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(Timeframe::M5, i, 100.0 + i as f64 * 0.1))
            .collect();
        let set = compute(Timeframe::M5, &candles);
        assert!(set.ema9.is_some());
        assert!(set.ema20.is_some());
        assert!(set.vwap.is_some());
        assert!(set.prior_high_20.is_some());
        assert!(set.atr14.is_some());
        assert!(set.obv_slope.is_some());
        assert!(set.rel_vol.is_some());
        assert!(set.avg_dollar_vol_20.is_some());
        assert_eq!(set.thin_volume, Some(false));
        // 5m carries no long EMAs.
        assert!(set.ema50.is_none());
        assert!(set.ema200.is_none());
    }

    #[test]
    fn anchor_prefers_vwap() {
        let set = IndicatorSet {
            vwap: Some(98.0),
            ema20: Some(97.0),
            ..IndicatorSet::default()
        };
        assert_eq!(set.anchor(), Some(98.0));

        let set = IndicatorSet {
            ema20: Some(97.0),
            ..IndicatorSet::default()
        };
        assert_eq!(set.anchor(), Some(97.0));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| candle(Timeframe::M15, i, 100.0 + (i as f64 * 0.7).sin()))
            .collect();
        let a = compute(Timeframe::M15, &candles);
        let b = compute(Timeframe::M15, &candles);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
