// =============================================================================
// Momentum state machine
// =============================================================================
//
// The machine is not persisted between requests: the current state is
// re-derived by replaying the transition table over the recent history of 5m
// closes, so two requests that see the same store contents always agree.
//
// Transitions are evaluated in order; the first matching rule wins.
// =============================================================================

use crate::indicators;
use crate::market_data::Candle;
use crate::types::{MomentumState, Timeframe};

/// How many recent 5m closes the replay walks to recover the state.
pub const REPLAY_DEPTH: usize = 12;

/// Boolean snapshot of the closed 5m/15m picture that drives transitions.
#[derive(Debug, Clone, Copy)]
pub struct StateInputs {
    /// `close > EMA9 > EMA20` on 5m.
    pub trend_up_5m: bool,
    /// `close > EMA20` on 15m.
    pub trend_up_15m: bool,
    /// 15m close holding above the swing-low proxy and PriorLow20.
    pub structure_intact_15m: bool,
    /// 5m close above the anchor (VWAP, else EMA20).
    pub above_vwap: bool,
    /// OBV slope positive on 5m and non-negative on 15m.
    pub obv_confirm: bool,
    /// 5m close below both EMA20 and PriorLow20.
    pub breakdown_5m: bool,
    /// 15m close below EMA20 or below the swing-low proxy.
    pub breakdown_15m: bool,
}

/// Apply one transition. Returns the next state and the rule that fired.
pub fn step(from: MomentumState, i: &StateInputs) -> (MomentumState, &'static str) {
    use MomentumState::*;

    if i.breakdown_15m && i.breakdown_5m {
        return (Failed, "breakdown on both 5m and 15m");
    }
    if i.breakdown_5m {
        return (Failing, "5m breakdown with 15m holding");
    }
    if from == Failing && i.trend_up_5m {
        return (Building, "5m trend recovered after failing");
    }
    if i.trend_up_15m
        && i.trend_up_5m
        && i.structure_intact_15m
        && i.above_vwap
        && i.obv_confirm
    {
        return (Active, "full alignment: trend, structure, anchor, flow");
    }
    if i.trend_up_15m && (i.trend_up_5m != i.above_vwap) {
        return (Building, "15m trend with partial 5m confirmation");
    }
    if from == Active && !i.trend_up_5m {
        return (Pause, "5m trend lost without breakdown");
    }
    if from == Pause && i.trend_up_5m && i.above_vwap {
        return (Active, "5m trend and anchor reclaimed");
    }
    (NoMomo, "no momentum conditions met")
}

/// Derive the transition inputs from closed 5m and 15m series (oldest
/// first). `None` while any required indicator is still missing.
pub fn derive_inputs(five: &[Candle], fifteen: &[Candle]) -> Option<StateInputs> {
    let set5 = indicators::compute(Timeframe::M5, five);
    let set15 = indicators::compute(Timeframe::M15, fifteen);

    let c5 = set5.close?;
    let ema9_5 = set5.ema9?;
    let ema20_5 = set5.ema20?;
    let anchor = set5.anchor()?;
    let prior_low_5 = set5.prior_low_20?;
    let obv5 = set5.obv_slope?;

    let c15 = set15.close?;
    let ema20_15 = set15.ema20?;
    let swing_low_15 = set15.swing_low_20?;
    let prior_low_15 = set15.prior_low_20?;
    let obv15 = set15.obv_slope?;

    Some(StateInputs {
        trend_up_5m: c5 > ema9_5 && ema9_5 > ema20_5,
        trend_up_15m: c15 > ema20_15,
        structure_intact_15m: c15 >= swing_low_15 && c15 >= prior_low_15,
        above_vwap: c5 > anchor,
        obv_confirm: obv5 > 0.0 && obv15 >= 0.0,
        breakdown_5m: c5 < ema20_5 && c5 < prior_low_5,
        breakdown_15m: c15 < ema20_15 || c15 < swing_low_15,
    })
}

/// Replay the machine over the last [`REPLAY_DEPTH`] 5m closes.
///
/// Each historical step sees only the candles that were closed at that
/// point; the 15m series is truncated to bars at or before the 5m bar under
/// evaluation. Steps whose indicators are not yet defined leave the state
/// unchanged.
pub fn replay(
    five: &[Candle],
    fifteen: &[Candle],
) -> (MomentumState, &'static str, Option<StateInputs>) {
    let mut state = MomentumState::NoMomo;
    let mut rule = "insufficient history to evaluate transitions";
    let mut last_inputs = None;

    let depth = REPLAY_DEPTH.min(five.len());
    for k in (0..depth).rev() {
        let five_prefix = &five[..five.len() - k];
        let last_ts = match five_prefix.last() {
            Some(c) => c.start_ts,
            None => continue,
        };
        let cut = fifteen.partition_point(|c| c.start_ts <= last_ts);
        let fifteen_prefix = &fifteen[..cut];

        if let Some(inputs) = derive_inputs(five_prefix, fifteen_prefix) {
            let (next, fired) = step(state, &inputs);
            state = next;
            rule = fired;
            last_inputs = Some(inputs);
        }
    }

    (state, rule, last_inputs)
}
