// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the scoring
// engine consumes. Every function returns `Option<T>` so callers are forced
// to handle insufficient-history and numerical-edge cases; a missing value
// is never reported as zero.

pub mod atr;
pub mod ema;
pub mod engine;
pub mod levels;
pub mod obv;
pub mod relvol;
pub mod vwap;

pub use engine::{compute, IndicatorSet};
