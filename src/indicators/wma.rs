// =============================================================================
// Weighted Moving Average (WMA)
// =============================================================================
//
//   WMA = Σ prev(i) * (length - i) / Σ (length - i),   i = 0 .. length-1
//
// Linear recency weighting: the newest value carries weight `length`, the
// oldest in the window weight 1.
// =============================================================================

use super::{check_window, prev, IndicatorError};

/// Linearly recency-weighted mean of the newest `length` elements of
/// `series` (oldest-first order).
pub fn wma(series: &[f64], length: usize) -> Result<f64, IndicatorError> {
    check_window(series, length, 0)?;
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for i in 0..length {
        let value = prev(series, i).ok_or(IndicatorError::InsufficientHistory {
            required: length,
            available: series.len(),
        })?;
        let weight = (length - i) as f64;
        weighted_sum += value * weight;
        weight_sum += weight;
    }
    Ok(weighted_sum / weight_sum)
}
