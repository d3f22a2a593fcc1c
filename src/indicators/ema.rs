// =============================================================================
// Exponential-style Moving Average (EMA)
// =============================================================================
//
// Blends the newest value with the *lagged* simple average of the `length`
// values before it:
//
//   multiplier = 2 / (length + 1)
//   EMA        = prev(0) * multiplier + SMA(length, offset = 1) * (1 - multiplier)
//
// This is not the recursive EMA_{t-1} form.
// =============================================================================

use super::{check_window, prev, sma, IndicatorError};

/// Lagged-SMA exponential blend over `series` (oldest-first order).
///
/// Needs `length + 1` elements: the newest plus `length` before it.
pub fn ema(series: &[f64], length: usize) -> Result<f64, IndicatorError> {
    check_window(series, length, 1)?;
    let multiplier = 2.0 / (length as f64 + 1.0);
    let newest = prev(series, 0).ok_or(IndicatorError::InsufficientHistory {
        required: 1,
        available: 0,
    })?;
    let lagged = sma(series, length, 1)?;
    Ok(newest * multiplier + lagged * (1.0 - multiplier))
}
