// =============================================================================
// Candle Engine — live tick-to-OHLC aggregation
// =============================================================================
//
// Ticks from a market-data feed update the in-progress period; an
// epoch-aligned scheduler closes each period into a bounded history; hooks
// receive every closed candle with a read-only history snapshot and can run
// SMA / EMA / WMA over it.
// =============================================================================

pub mod api;
pub mod engine;
pub mod hook;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
pub mod scheduler;
pub mod service;
pub mod types;

pub use engine::{CandleEngine, CandleEvent, EngineView};
pub use hook::{LogHook, StrategyHook};
pub use indicators::IndicatorError;
pub use market_data::{HistorySnapshot, PeriodSnapshot, TickIngestor};
pub use runtime_config::EngineConfig;
pub use service::{EngineHandle, EngineService};
pub use types::{ClosedCandle, ConnectionEvent, EngineSummary, Series, Tick};
