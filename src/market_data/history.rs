use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::indicators::{self, IndicatorError};
use crate::types::Series;

// ---------------------------------------------------------------------------
// HistoryStore -- three aligned FIFO series of closed periods
// ---------------------------------------------------------------------------

/// Bounded close/high/low history. Index `i` in each series refers to the
/// same closed period; the oldest period is evicted first once `capacity`
/// periods are held.
///
/// Not synchronised on its own. The engine keeps it behind a single lock and
/// hands readers [`HistorySnapshot`]s only.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    close: VecDeque<f64>,
    high: VecDeque<f64>,
    low: VecDeque<f64>,
    capacity: usize,
}

impl HistoryStore {
    /// Create an empty store holding at most `capacity` periods (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            close: VecDeque::with_capacity(capacity + 1),
            high: VecDeque::with_capacity(capacity + 1),
            low: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append one closed period, evicting the oldest when full.
    ///
    /// Nothing in here can fail, so the three series always move together.
    pub fn append(&mut self, close: f64, high: f64, low: f64) {
        if self.close.len() >= self.capacity {
            self.close.pop_front();
            self.high.pop_front();
            self.low.pop_front();
        }
        self.close.push_back(close);
        self.high.push_back(high);
        self.low.push_back(low);
    }

    /// Immutable copy of all three series, oldest first.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            inner: Arc::new(SnapshotSeries {
                close: self.close.iter().copied().collect(),
                high: self.high.iter().copied().collect(),
                low: self.low.iter().copied().collect(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close of the most recent closed period, if any.
    pub fn last_close(&self) -> Option<f64> {
        self.close.back().copied()
    }
}

// ---------------------------------------------------------------------------
// HistorySnapshot -- frozen view handed to readers
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Serialize)]
struct SnapshotSeries {
    close: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
}

/// Read-only copy of the history at one instant. Cloning shares the
/// underlying buffers; later appends to the store are never visible here.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySnapshot {
    inner: Arc<SnapshotSeries>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.inner.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.close.is_empty()
    }

    /// The requested series, oldest first.
    pub fn series(&self, series: Series) -> &[f64] {
        match series {
            Series::Close => &self.inner.close,
            Series::High => &self.inner.high,
            Series::Low => &self.inner.low,
        }
    }

    pub fn closes(&self) -> &[f64] {
        &self.inner.close
    }

    pub fn highs(&self) -> &[f64] {
        &self.inner.high
    }

    pub fn lows(&self) -> &[f64] {
        &self.inner.low
    }

    /// Element `k` periods back from the newest (`k == 0` is the newest).
    pub fn prev(&self, series: Series, k: usize) -> Option<f64> {
        indicators::prev(self.series(series), k)
    }

    pub fn sma(&self, series: Series, length: usize, offset: usize) -> Result<f64, IndicatorError> {
        indicators::sma(self.series(series), length, offset)
    }

    pub fn ema(&self, series: Series, length: usize) -> Result<f64, IndicatorError> {
        indicators::ema(self.series(series), length)
    }

    pub fn wma(&self, series: Series, length: usize) -> Result<f64, IndicatorError> {
        indicators::wma(self.series(series), length)
    }
}

impl Serialize for HistorySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, closes: &[f64]) -> HistoryStore {
        let mut store = HistoryStore::new(capacity);
        for &c in closes {
            store.append(c, c + 1.0, c - 1.0);
        }
        store
    }

    #[test]
    fn fifo_eviction_keeps_last_mem_length() {
        // MEM_LENGTH = 3, five closes -> only the last three remain.
        let store = filled(3, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let snap = store.snapshot();
        assert_eq!(snap.closes(), &[3.0, 4.0, 5.0]);
        assert_eq!(snap.highs(), &[4.0, 5.0, 6.0]);
        assert_eq!(snap.lows(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn series_lengths_stay_aligned_and_bounded() {
        let mut store = HistoryStore::new(4);
        for i in 0..10 {
            store.append(i as f64, i as f64, i as f64);
            let snap = store.snapshot();
            assert_eq!(snap.closes().len(), snap.highs().len());
            assert_eq!(snap.highs().len(), snap.lows().len());
            assert!(snap.len() <= 4);
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn snapshot_is_stable_under_later_appends() {
        let mut store = filled(3, &[1.0, 2.0]);
        let snap = store.snapshot();
        store.append(9.0, 9.0, 9.0);
        store.append(10.0, 10.0, 10.0);
        assert_eq!(snap.closes(), &[1.0, 2.0]);
        assert_eq!(store.snapshot().closes(), &[2.0, 9.0, 10.0]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let store = filled(0, &[1.0, 2.0]);
        assert_eq!(store.capacity(), 1);
        assert_eq!(store.snapshot().closes(), &[2.0]);
    }

    #[test]
    fn prev_indexes_from_newest() {
        let snap = filled(10, &[1.0, 2.0, 3.0]).snapshot();
        assert_eq!(snap.prev(Series::Close, 0), Some(3.0));
        assert_eq!(snap.prev(Series::Close, 2), Some(1.0));
        assert_eq!(snap.prev(Series::Close, 3), None);
        assert_eq!(snap.prev(Series::High, 0), Some(4.0));
    }

    #[test]
    fn last_close_empty_returns_none() {
        let store = HistoryStore::new(5);
        assert!(store.is_empty());
        assert_eq!(store.last_close(), None);
    }

    #[test]
    fn snapshot_serialises_as_three_arrays() {
        let snap = filled(5, &[1.0, 2.0]).snapshot();
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["close"], serde_json::json!([1.0, 2.0]));
        assert_eq!(v["low"], serde_json::json!([0.0, 1.0]));
    }
}
