// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free moving averages over one history series.  Series are
// stored oldest first; every indicator reads backwards from the newest
// element.  Short history is reported as a typed error, never a partial
// value.

pub mod ema;
pub mod sma;
pub mod wma;

pub use ema::ema;
pub use sma::sma;
pub use wma::wma;

use thiserror::Error;

/// Failure modes of an indicator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("insufficient history: {required} periods required, {available} available")]
    InsufficientHistory { required: usize, available: usize },

    #[error("indicator length must be at least 1")]
    ZeroLength,
}

/// Element `k` positions back from the newest (`k == 0` is the newest).
pub fn prev(series: &[f64], k: usize) -> Option<f64> {
    let idx = series.len().checked_sub(k + 1)?;
    series.get(idx).copied()
}

/// Validate a window of `length` elements starting `offset` back from the
/// newest.
pub(crate) fn check_window(series: &[f64], length: usize, offset: usize) -> Result<(), IndicatorError> {
    if length == 0 {
        return Err(IndicatorError::ZeroLength);
    }
    let required = length.saturating_add(offset);
    if required > series.len() {
        return Err(IndicatorError::InsufficientHistory {
            required,
            available: series.len(),
        });
    }
    Ok(())
}
