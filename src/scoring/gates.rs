// =============================================================================
// Hard gates — binary preconditions for a BUY
// =============================================================================
//
// Every gate is evaluated independently and appends an audit entry whether
// it passes or fails, so a response always explains itself. Missing inputs
// fail the gate: the engine never buys on partial information.
// =============================================================================

use serde::Serialize;

use crate::error::EngineError;
use crate::indicators::IndicatorSet;
use crate::market_data::Freshness;
use crate::tape::{RiskRegime, TapeSnapshot};
use crate::types::Timeframe;

/// Minimum RelVol on 5m for the liquidity gate.
const MIN_REL_VOL: f64 = 0.5;
/// Minimum RS_30m required while the tape is risk-off (+0.5%).
const RISK_OFF_MIN_RS: f64 = 0.005;
/// No-chase distance cap as a multiple of ATR14(5m).
const NO_CHASE_ATR_MULT: f64 = 2.0;

/// One gate evaluation in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub gate_name: String,
    pub passed: bool,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(gate_name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Outcome of the full gate pass.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub liquidity_ok: bool,
    pub structure_ok: bool,
    pub no_chase_ok: bool,
    pub tape_ok: bool,
    pub freshness_ok: bool,
    pub missing_tfs: Vec<String>,
    pub entries: Vec<AuditEntry>,
}

impl GateReport {
    /// Gates 2-5: everything except liquidity, which forces IGNORE on its
    /// own and is handled separately in the decision mapping.
    pub fn non_liquidity_ok(&self) -> bool {
        self.structure_ok && self.no_chase_ok && self.tape_ok && self.freshness_ok
    }
}

/// Evaluate all hard gates.
pub fn evaluate(
    five: &IndicatorSet,
    fifteen: &IndicatorSet,
    tape: &TapeSnapshot,
    fresh_5m: Freshness,
    fresh_15m: Freshness,
    liquidity_floor_usd: f64,
) -> GateReport {
    let mut entries = Vec::with_capacity(5);

    // ── 1. Liquidity ────────────────────────────────────────────────────
    let (liquidity_ok, liquidity_detail) = match (five.rel_vol, five.avg_dollar_vol_20) {
        (Some(rv), Some(adv)) => {
            if rv >= MIN_REL_VOL && adv >= liquidity_floor_usd {
                (true, format!("rel_vol={rv:.2}, avg_dollar_vol=${adv:.0}"))
            } else {
                let why = EngineError::LiquidityFail(format!(
                    "rel_vol={rv:.2} (min {MIN_REL_VOL}), avg_dollar_vol=${adv:.0} (floor ${liquidity_floor_usd:.0})"
                ));
                (false, why.to_string())
            }
        }
        _ => (
            false,
            EngineError::LiquidityFail("rel_vol or dollar volume unavailable".into()).to_string(),
        ),
    };
    entries.push(AuditEntry::new("liquidity", liquidity_ok, liquidity_detail));

    // ── 2. Structure ────────────────────────────────────────────────────
    let (structure_ok, structure_detail) =
        match (fifteen.close, fifteen.swing_low_20, fifteen.prior_low_20) {
            (Some(c), Some(swing), Some(prior)) => {
                let ok = c >= swing && c >= prior;
                (
                    ok,
                    format!("close={c:.4} vs swing_low={swing:.4}, prior_low={prior:.4}"),
                )
            }
            _ => (false, "15m structure levels unavailable".to_string()),
        };
    entries.push(AuditEntry::new("structure", structure_ok, structure_detail));

    // ── 3. No-chase ─────────────────────────────────────────────────────
    let (no_chase_ok, no_chase_detail) = match (five.close, five.anchor(), five.atr14) {
        (Some(c), Some(anchor), Some(atr)) => {
            let dist = (c - anchor).abs();
            let limit = NO_CHASE_ATR_MULT * atr;
            (
                dist <= limit,
                format!("distance={dist:.4} vs limit={limit:.4} (anchor={anchor:.4})"),
            )
        }
        _ => (false, "anchor or ATR unavailable".to_string()),
    };
    entries.push(AuditEntry::new("no_chase", no_chase_ok, no_chase_detail));

    // ── 4. Tape ─────────────────────────────────────────────────────────
    let (tape_ok, tape_detail) = match tape.regime() {
        RiskRegime::RiskOn => (true, "risk on".to_string()),
        RiskRegime::RiskOff => match tape.rs_30m {
            Some(rs) if rs >= RISK_OFF_MIN_RS => {
                (true, format!("risk_off, rs_30m={:.2}% compensates", rs * 100.0))
            }
            Some(rs) => (
                false,
                format!("risk_off, rs insufficient ({:.2}% < 0.50%)", rs * 100.0),
            ),
            None => (false, "risk_off, rs_30m unavailable".to_string()),
        },
        RiskRegime::Unknown => (false, "reference instruments stale or missing".to_string()),
    };
    entries.push(AuditEntry::new("tape", tape_ok, tape_detail));

    // ── 5. Freshness ────────────────────────────────────────────────────
    let mut missing_tfs = Vec::new();
    if fresh_5m != Freshness::Fresh {
        missing_tfs.push(Timeframe::M5.label().to_string());
    }
    if fresh_15m != Freshness::Fresh {
        missing_tfs.push(Timeframe::M15.label().to_string());
    }
    let freshness_ok = missing_tfs.is_empty();
    let freshness_detail = if freshness_ok {
        "5m and 15m fresh".to_string()
    } else {
        EngineError::StaleData(format!("not fresh: {}", missing_tfs.join(", "))).to_string()
    };
    entries.push(AuditEntry::new("freshness", freshness_ok, freshness_detail));

    GateReport {
        liquidity_ok,
        structure_ok,
        no_chase_ok,
        tape_ok,
        freshness_ok,
        missing_tfs,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_five() -> IndicatorSet {
        IndicatorSet {
            close: Some(100.0),
            ema9: Some(99.0),
            ema20: Some(97.0),
            vwap: Some(98.0),
            atr14: Some(0.8),
            rel_vol: Some(1.4),
            avg_dollar_vol_20: Some(5_000_000.0),
            obv_slope: Some(0.5),
            prior_low_20: Some(95.0),
            ..IndicatorSet::default()
        }
    }

    fn healthy_fifteen() -> IndicatorSet {
        IndicatorSet {
            close: Some(100.0),
            ema20: Some(96.0),
            swing_low_20: Some(92.0),
            prior_low_20: Some(92.0),
            atr14: Some(1.5),
            obv_slope: Some(0.2),
            ..IndicatorSet::default()
        }
    }

    fn risk_on_tape() -> TapeSnapshot {
        TapeSnapshot {
            market_risk_off: Some(false),
            rs_30m: Some(0.012),
            computed_at_ms: 0,
        }
    }

    fn run(five: IndicatorSet, fifteen: IndicatorSet, tape: TapeSnapshot) -> GateReport {
        evaluate(
            &five,
            &fifteen,
            &tape,
            Freshness::Fresh,
            Freshness::Fresh,
            1_000_000.0,
        )
    }

    #[test]
    fn all_gates_pass_on_healthy_inputs() {
        let report = run(healthy_five(), healthy_fifteen(), risk_on_tape());
        assert!(report.liquidity_ok);
        assert!(report.non_liquidity_ok());
        assert_eq!(report.entries.len(), 5);
        assert!(report.entries.iter().all(|e| e.passed));
    }

    #[test]
    fn low_dollar_volume_fails_liquidity() {
        let mut five = healthy_five();
        five.avg_dollar_vol_20 = Some(200_000.0);
        let report = run(five, healthy_fifteen(), risk_on_tape());
        assert!(!report.liquidity_ok);
        let entry = &report.entries[0];
        assert_eq!(entry.gate_name, "liquidity");
        assert!(!entry.passed);
        assert!(entry.detail.contains("liquidity floor not met"));
    }

    #[test]
    fn chase_distance_fails_no_chase() {
        let mut five = healthy_five();
        five.close = Some(102.0); // 4.0 from vwap vs limit 1.6
        let report = run(five, healthy_fifteen(), risk_on_tape());
        assert!(!report.no_chase_ok);
    }

    #[test]
    fn no_chase_falls_back_to_ema20_anchor() {
        let mut five = healthy_five();
        five.vwap = None;
        five.close = Some(98.0); // 1.0 from ema20=97 vs limit 1.6
        let report = run(five, healthy_fifteen(), risk_on_tape());
        assert!(report.no_chase_ok);
    }

    #[test]
    fn risk_off_requires_strong_rs() {
        let mut tape = risk_on_tape();
        tape.market_risk_off = Some(true);
        tape.rs_30m = Some(0.001);
        let report = run(healthy_five(), healthy_fifteen(), tape);
        assert!(!report.tape_ok);
        assert!(report.entries[3].detail.contains("rs insufficient"));

        let mut tape = risk_on_tape();
        tape.market_risk_off = Some(true);
        tape.rs_30m = Some(0.012);
        let report = run(healthy_five(), healthy_fifteen(), tape);
        assert!(report.tape_ok);
    }

    #[test]
    fn unknown_regime_fails_tape_gate() {
        let mut tape = risk_on_tape();
        tape.market_risk_off = None;
        let report = run(healthy_five(), healthy_fifteen(), tape);
        assert!(!report.tape_ok);
    }

    #[test]
    fn stale_timeframes_fail_freshness_and_list_them() {
        let report = evaluate(
            &healthy_five(),
            &healthy_fifteen(),
            &risk_on_tape(),
            Freshness::Fresh,
            Freshness::Stale,
            1_000_000.0,
        );
        assert!(!report.freshness_ok);
        assert_eq!(report.missing_tfs, vec!["15m".to_string()]);
    }

    #[test]
    fn missing_inputs_fail_closed() {
        let report = run(IndicatorSet::default(), IndicatorSet::default(), risk_on_tape());
        assert!(!report.liquidity_ok);
        assert!(!report.structure_ok);
        assert!(!report.no_chase_ok);
    }
}
