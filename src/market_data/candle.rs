// =============================================================================
// Candle and series key types
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{CandleSource, SessionTag, Timeframe};

/// A single OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar start, epoch ms UTC, aligned to the timeframe width.
    pub start_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub session: SessionTag,
    pub is_closed: bool,
    pub source: CandleSource,
}

impl Candle {
    /// `(high + low + close) / 3`, the anchor price for VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Traded notional approximated from the close.
    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume
    }

    /// Nominal close time of the bar (exclusive end of its window).
    pub fn end_ts(&self) -> i64 {
        self.start_ts + self.timeframe.ms()
    }

    /// Check the bar invariants against `now_ms`.
    ///
    /// Rejections:
    /// - `start_ts` not aligned to the timeframe width
    /// - non-finite OHLCV, non-positive prices, negative volume
    /// - OHLC ordering broken (`low <= min(o,c) <= max(o,c) <= high`)
    /// - bar starting in the future
    /// - a bar marked closed whose nominal close is still in the future
    pub fn validate(&self, now_ms: i64) -> Result<(), EngineError> {
        let reject = |detail: String| {
            Err(EngineError::MalformedCandle(format!(
                "{}@{} start={}: {}",
                self.symbol, self.timeframe, self.start_ts, detail
            )))
        };

        if self.symbol.is_empty() {
            return reject("empty symbol".into());
        }
        if self.start_ts % self.timeframe.ms() != 0 {
            return reject("start_ts not aligned".into());
        }

        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return reject("non-finite field".into());
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return reject("non-positive price".into());
        }
        if self.volume < 0.0 {
            return reject("negative volume".into());
        }

        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if !(self.low <= body_low && body_high <= self.high) {
            return reject(format!(
                "OHLC ordering broken (o={} h={} l={} c={})",
                self.open, self.high, self.low, self.close
            ));
        }

        if self.start_ts > now_ms {
            return reject("start_ts in the future".into());
        }
        if self.is_closed && self.end_ts() > now_ms {
            return reject("closed bar with nominal close in the future".into());
        }

        Ok(())
    }
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(start_ts: i64, o: f64, h: f64, l: f64, c: f64, is_closed: bool) -> Candle {
        Candle {
            symbol: "SPY".into(),
            timeframe: Timeframe::M1,
            start_ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1000.0,
            session: SessionTag::Rth,
            is_closed,
            source: CandleSource::Ws,
        }
    }

    const NOW: i64 = 1_700_000_400_000; // aligned to the minute

    #[test]
    fn valid_candle_passes() {
        let c = candle(NOW - 60_000, 100.0, 101.0, 99.5, 100.5, true);
        assert!(c.validate(NOW).is_ok());
    }

    #[test]
    fn misaligned_start_rejected() {
        let c = candle(NOW - 60_000 + 1, 100.0, 101.0, 99.5, 100.5, true);
        assert!(c.validate(NOW).is_err());
    }

    #[test]
    fn broken_ohlc_ordering_rejected() {
        // high below the body
        let c = candle(NOW - 60_000, 100.0, 99.0, 98.0, 100.5, true);
        assert!(c.validate(NOW).is_err());
        // low above the body
        let c = candle(NOW - 60_000, 100.0, 101.0, 100.2, 100.1, true);
        assert!(c.validate(NOW).is_err());
    }

    #[test]
    fn future_close_must_be_open() {
        // Bar started 30s ago; its nominal close is 30s in the future.
        let start = Timeframe::M1.bucket(NOW);
        let closed = candle(start, 100.0, 101.0, 99.5, 100.5, true);
        assert!(closed.validate(NOW + 30_000).is_err());

        let open = candle(start, 100.0, 101.0, 99.5, 100.5, false);
        assert!(open.validate(NOW + 30_000).is_ok());
    }

    #[test]
    fn non_finite_rejected() {
        let c = candle(NOW - 60_000, f64::NAN, 101.0, 99.5, 100.5, true);
        assert!(c.validate(NOW).is_err());
    }

    #[test]
    fn typical_price_is_hlc_mean() {
        let c = candle(NOW - 60_000, 100.0, 102.0, 98.0, 100.0, true);
        assert!((c.typical_price() - 100.0).abs() < 1e-12);
    }
}
