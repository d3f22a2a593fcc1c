// =============================================================================
// Tick Ingestor — turns raw feed payloads into period updates
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::engine::CandleEngine;
use crate::types::{ConnectionEvent, Tick};

/// Parses feed messages and folds their prices into the engine's open period.
#[derive(Clone)]
pub struct TickIngestor {
    engine: Arc<CandleEngine>,
}

impl TickIngestor {
    pub fn new(engine: Arc<CandleEngine>) -> Self {
        Self { engine }
    }

    /// Apply one price to the open period.
    pub fn on_tick(&self, price: f64) -> bool {
        self.engine.on_tick(price)
    }

    /// Parse and apply one feed message. Malformed messages are counted and
    /// dropped; they never stop the stream.
    pub fn on_message(&self, text: &str) -> Option<Tick> {
        match parse_tick(text) {
            Ok(tick) if self.engine.on_tick(tick.price) => Some(tick),
            Ok(_) => None,
            Err(e) => {
                self.engine.record_discarded();
                debug!(error = %e, "dropping malformed tick message");
                None
            }
        }
    }

    /// Forward a connection notification to the engine's observers.
    pub fn notify(&self, event: ConnectionEvent) {
        self.engine.notify_connection(event);
    }
}

/// Parse a trade message into a [`Tick`].
///
/// Expected shape (Binance trade / aggTrade, optionally inside a combined
/// stream `data` envelope):
/// ```json
/// { "e": "trade", "E": 1700000000001, "s": "BTCUSDT", "p": "37000.00", "T": 1700000000000 }
/// ```
/// The trade time `T` is preferred over the event time `E`; without either
/// the local clock is used.
pub fn parse_tick(text: &str) -> Result<Tick> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse tick JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let price = parse_price(&data["p"])?;
    let timestamp = data["T"]
        .as_i64()
        .or_else(|| data["E"].as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    Ok(Tick { price, timestamp })
}

/// Binance sends prices as JSON strings; plain numbers are accepted too.
fn parse_price(val: &serde_json::Value) -> Result<f64> {
    let price = match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse price as f64: {s}"))?,
        serde_json::Value::Number(n) => n.as_f64().context("price is not a valid f64")?,
        serde_json::Value::Null => anyhow::bail!("missing field p"),
        _ => anyhow::bail!("field p has unexpected JSON type"),
    };
    if !price.is_finite() {
        anyhow::bail!("price is not finite: {price}");
    }
    Ok(price)
}
