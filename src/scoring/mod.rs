// =============================================================================
// ScoringEngine — momentum state, hard gates, decision, audit
// =============================================================================
//
// A pure function of the read-consistent store views taken at request start:
// identical candle data always produces an identical result (timestamps
// aside). The signal is conservative under uncertainty: BUY is only
// possible when the state machine is ACTIVE and every hard gate passes on
// fully-present, fresh inputs.
// =============================================================================

pub mod gates;
pub mod state_machine;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::indicators::{self, IndicatorSet};
use crate::market_data::{Freshness, TickerView};
use crate::tape::{self, RiskRegime, TapeSnapshot};
use crate::types::{MomentumState, Signal, Timeframe};

pub use gates::AuditEntry;

/// Pullback entries extend half an ATR above the anchor.
const PULLBACK_ENTRY_ATR_MULT: f64 = 0.5;
/// Breakout entries bracket the close by a quarter ATR.
const BREAKOUT_ENTRY_ATR_MULT: f64 = 0.25;
/// Stop distance below the anchor.
const STOP_ATR_MULT: f64 = 1.2;

/// Suggested entry band, low to high.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRange {
    pub lo: f64,
    pub hi: f64,
}

/// The scored output returned by `GET /score`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub signal: Signal,
    pub state: MomentumState,
    pub confidence: f64,
    pub size_hint: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_range: Option<EntryRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<f64>>,
    /// Freshness per timeframe label; BTreeMap keeps key order stable so
    /// identical inputs serialize identically.
    pub freshness: BTreeMap<&'static str, Freshness>,
    pub missing_tfs: Vec<String>,
    pub tape: TapeSnapshot,
    pub audit: Vec<AuditEntry>,
}

pub struct ScoringEngine {
    liquidity_floor_usd: f64,
}

impl ScoringEngine {
    pub fn new(liquidity_floor_usd: f64) -> Self {
        Self { liquidity_floor_usd }
    }

    /// Score one ticker against the reference views.
    pub fn score(
        &self,
        ticker: &TickerView,
        spy: &TickerView,
        qqq: &TickerView,
        now_ms: i64,
    ) -> ScoreResult {
        let five = ticker.closed(Timeframe::M5);
        let fifteen = ticker.closed(Timeframe::M15);

        let set5 = indicators::compute(Timeframe::M5, five);
        let set15 = indicators::compute(Timeframe::M15, fifteen);

        let tape = tape::derive(spy, qqq, five, now_ms);

        // ── State machine ───────────────────────────────────────────────
        let (state, rule, last_inputs) = state_machine::replay(five, fifteen);

        let mut audit = Vec::with_capacity(8);
        audit.push(AuditEntry::new(
            "state_machine",
            !matches!(state, MomentumState::Failing | MomentumState::Failed),
            format!("{state}: {rule}"),
        ));

        // ── Hard gates ──────────────────────────────────────────────────
        let report = gates::evaluate(
            &set5,
            &set15,
            &tape,
            ticker.freshness(Timeframe::M5),
            ticker.freshness(Timeframe::M15),
            self.liquidity_floor_usd,
        );
        audit.extend(report.entries.iter().cloned());

        // ── Decision mapping ────────────────────────────────────────────
        let exit_confirmed = match state {
            MomentumState::Failed => true,
            MomentumState::Failing => {
                // A failing state needs a flow signal on top of the price
                // structure before we call it an exit.
                let confirmed = matches!(set5.obv_slope, Some(s) if s <= 0.0);
                audit.push(AuditEntry::new(
                    "exit_confirmation",
                    confirmed,
                    match set5.obv_slope {
                        Some(s) => format!("obv_slope_5m={s:.4}"),
                        None => "obv_slope_5m unavailable".to_string(),
                    },
                ));
                confirmed
            }
            _ => false,
        };

        let signal = if !report.liquidity_ok {
            Signal::Ignore
        } else if !report.freshness_ok {
            Signal::Hold
        } else if exit_confirmed {
            Signal::Exit
        } else if state == MomentumState::Active && report.non_liquidity_ok() {
            Signal::Buy
        } else {
            Signal::Hold
        };

        // ── Confidence ──────────────────────────────────────────────────
        let confidence = match &last_inputs {
            Some(inputs) => {
                let mut c: f64 = 0.5;
                if inputs.obv_confirm {
                    c += 0.1;
                }
                if matches!(tape.rs_30m, Some(rs) if rs > 0.0) {
                    c += 0.1;
                }
                if tape.regime() == RiskRegime::RiskOn {
                    c += 0.1;
                }
                if inputs.trend_up_15m {
                    c += 0.1;
                }
                if matches!(set5.rel_vol, Some(rv) if rv >= 1.0) {
                    c += 0.1;
                }
                c.clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        // ── Risk outputs (BUY only) ─────────────────────────────────────
        let (entry_range, stop, targets, size_hint) = if signal == Signal::Buy {
            self.risk_outputs(&set5, &set15, confidence)
        } else {
            (None, None, None, 0.0)
        };

        let mut freshness = BTreeMap::new();
        for tf in Timeframe::ALL {
            freshness.insert(tf.label(), ticker.freshness(tf));
        }

        ScoreResult {
            signal,
            state,
            confidence,
            size_hint,
            entry_range,
            stop,
            targets,
            freshness,
            missing_tfs: report.missing_tfs,
            tape,
            audit,
        }
    }

    fn risk_outputs(
        &self,
        set5: &IndicatorSet,
        set15: &IndicatorSet,
        confidence: f64,
    ) -> (Option<EntryRange>, Option<f64>, Option<Vec<f64>>, f64) {
        // BUY implies the no-chase gate passed, so close, anchor and ATR are
        // all present; stay defensive regardless.
        let (Some(close), Some(anchor), Some(atr)) = (set5.close, set5.anchor(), set5.atr14)
        else {
            return (None, None, None, 0.0);
        };

        let entry_range = if close > anchor + PULLBACK_ENTRY_ATR_MULT * atr {
            EntryRange {
                lo: close - BREAKOUT_ENTRY_ATR_MULT * atr,
                hi: close + BREAKOUT_ENTRY_ATR_MULT * atr,
            }
        } else {
            EntryRange {
                lo: anchor,
                hi: anchor + PULLBACK_ENTRY_ATR_MULT * atr,
            }
        };

        let stop = anchor - STOP_ATR_MULT * atr;

        let targets = set15
            .atr14
            .map(|atr15| vec![close + atr15, close + 2.0 * atr15]);

        let dist = (close - anchor).abs();
        let size_hint = confidence * (1.0 - (dist / (2.0 * atr)).min(1.0));

        (Some(entry_range), Some(stop), targets, size_hint)
    }

    /// Trailing-stop hook. Not implemented; returns `None` by contract.
    pub fn trailing_stop(&self, _result: &ScoreResult) -> Option<f64> {
        None
    }

    /// Time-stop hook. Not implemented; returns `None` by contract.
    pub fn time_stop_ms(&self, _result: &ScoreResult) -> Option<i64> {
        None
    }
}
