// =============================================================================
// Shared types used across the candle engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// One price update from the market-data feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    /// Exchange timestamp in epoch milliseconds.
    pub timestamp: i64,
}

/// Open/high/low/close summary of one completed period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosedCandle {
    /// Value of the period counter assigned at rollover (first candle is 1).
    pub period: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Ticks applied while this period was open.
    pub tick_count: u64,
    /// Wall-clock time of the rollover, epoch milliseconds.
    pub closed_at: i64,
}

/// Which of the three aligned history series to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Series {
    Close,
    High,
    Low,
}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Close => write!(f, "close"),
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Connection lifecycle notification forwarded from the feed.
///
/// Informational only: nothing in the engine changes behaviour on these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected { url: String },
    Disconnected { url: String },
    Error { url: String, message: String },
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected { url } => write!(f, "Connected({url})"),
            Self::Disconnected { url } => write!(f, "Disconnected({url})"),
            Self::Error { url, message } => write!(f, "Error({url}: {message})"),
        }
    }
}

/// Final report produced by an explicit engine shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub periods_closed: u64,
    pub ticks_applied: u64,
    pub ticks_discarded: u64,
    /// Rollovers that had to wait behind another rollover.
    pub overlapping_rollovers: u64,
    pub history_len: usize,
    pub last_candle: Option<ClosedCandle>,
}

impl std::fmt::Display for EngineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "periods={} ticks={} discarded={} overlaps={} history={}",
            self.periods_closed,
            self.ticks_applied,
            self.ticks_discarded,
            self.overlapping_rollovers,
            self.history_len
        )
    }
}
