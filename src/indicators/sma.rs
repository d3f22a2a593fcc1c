// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
//   SMA(length, offset) = mean(prev(offset) .. prev(offset + length - 1))
//
// `offset` shifts the window into the past; `offset == 0` ends the window at
// the newest element.
// =============================================================================

use super::{check_window, IndicatorError};

/// Arithmetic mean of `length` elements ending `offset` periods back from the
/// newest element of `series` (oldest-first order).
pub fn sma(series: &[f64], length: usize, offset: usize) -> Result<f64, IndicatorError> {
    check_window(series, length, offset)?;
    let end = series.len() - offset;
    let window = &series[end - length..end];
    Ok(window.iter().sum::<f64>() / length as f64)
}
