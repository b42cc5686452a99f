// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Recurrence in increment form, with alpha = 2 / (n + 1):
//
//   EMA_t = EMA_{t-1} + alpha * (close_t - EMA_{t-1})
//
// The series starts from an SMA seed over the first `period` closes and is
// undefined before `period` closes exist.
// =============================================================================

/// Smoothing factor for an n-period EMA.
fn alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// SMA over the leading `period` closes, the seed of the EMA series.
fn sma_seed(closes: &[f64], period: usize) -> Option<f64> {
    let window = closes.get(..period)?;
    let seed = window.iter().sum::<f64>() / period as f64;
    seed.is_finite().then_some(seed)
}

/// Compute the EMA series for `closes` with look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Output element 0 corresponds to the close at index `period - 1`; a
/// non-finite value truncates the series rather than poisoning it.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return Vec::new();
    }
    let Some(seed) = sma_seed(closes, period) else {
        return Vec::new();
    };

    let a = alpha(period);
    let updates = closes[period..].iter().scan(seed, move |acc, &close| {
        *acc += a * (close - *acc);
        Some(*acc)
    });

    std::iter::once(seed)
        .chain(updates)
        .take_while(|v| v.is_finite())
        .collect()
}

/// Most recent EMA value, or `None` when fewer than `period` closes exist.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    ema_series(closes, period).last().copied()
}
