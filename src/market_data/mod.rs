pub mod feed;
pub mod history;
pub mod ingest;
pub mod period;

pub use history::{HistorySnapshot, HistoryStore};
pub use ingest::TickIngestor;
pub use period::{PeriodSnapshot, PeriodState};
