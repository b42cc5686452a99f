// =============================================================================
// Engine error kinds
// =============================================================================
//
// Ingest-layer kinds (MalformedTick, MalformedCandle, StaleData on the tick
// path) are absorbed locally with a counter increment and never fail a
// request. Request-layer kinds map to HTTP statuses in api::rest.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("malformed tick: {0}")]
    MalformedTick(String),

    #[error("malformed candle: {0}")]
    MalformedCandle(String),

    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("stale data: {0}")]
    StaleData(String),

    #[error("liquidity floor not met: {0}")]
    LiquidityFail(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

impl EngineError {
    /// Short machine-readable kind label, used in diagnostics counters and
    /// audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::MalformedTick(_) => "malformed_tick",
            Self::MalformedCandle(_) => "malformed_candle",
            Self::InsufficientHistory(_) => "insufficient_history",
            Self::StaleData(_) => "stale_data",
            Self::LiquidityFail(_) => "liquidity_fail",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InternalInvariantViolation(_) => "internal_invariant_violation",
        }
    }
}
