// =============================================================================
// Engine Configuration — period resolution, history depth, feed endpoint
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_resolution_secs() -> u64 {
    60
}

fn default_mem_length() -> usize {
    100
}

fn default_hook_queue_capacity() -> usize {
    64
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_catch_up_periods() -> u64 {
    3
}

fn default_log_ema_length() -> usize {
    11
}

fn default_api_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for one candle engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instrument whose trade stream is consumed.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Explicit websocket endpoint. Empty means "derive from `symbol`".
    #[serde(default)]
    pub feed_url: String,

    /// Period length in seconds. Boundaries are aligned to the Unix epoch.
    #[serde(default = "default_resolution_secs")]
    pub resolution_secs: u64,

    /// Number of closed periods retained in history.
    #[serde(default = "default_mem_length")]
    pub mem_length: usize,

    /// Closed-candle events buffered per hook before the oldest is dropped.
    #[serde(default = "default_hook_queue_capacity")]
    pub hook_queue_capacity: usize,

    /// Pause between feed reconnect attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Missed boundaries the scheduler still closes one by one after a
    /// stall. Further behind, it jumps to the next wall-clock boundary and
    /// the skipped periods' ticks land in a single candle. `0` never jumps.
    #[serde(default = "default_max_catch_up_periods")]
    pub max_catch_up_periods: u64,

    /// EMA length reported by the candle logging hook.
    #[serde(default = "default_log_ema_length")]
    pub log_ema_length: usize,

    /// Status API listen address. Empty disables the API.
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            feed_url: String::new(),
            resolution_secs: default_resolution_secs(),
            mem_length: default_mem_length(),
            hook_queue_capacity: default_hook_queue_capacity(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_catch_up_periods: default_max_catch_up_periods(),
            log_ema_length: default_log_ema_length(),
            api_bind_addr: default_api_bind_addr(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            resolution_secs = config.resolution_secs,
            mem_length = config.mem_length,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_*` environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(symbol) = std::env::var("CANDLE_SYMBOL") {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() {
                self.symbol = symbol;
            }
        }
        if let Ok(url) = std::env::var("CANDLE_FEED_URL") {
            self.feed_url = url.trim().to_string();
        }
        if let Ok(v) = std::env::var("CANDLE_RESOLUTION_SECS") {
            self.resolution_secs = v
                .trim()
                .parse()
                .with_context(|| format!("CANDLE_RESOLUTION_SECS is not an integer: {v}"))?;
        }
        if let Ok(v) = std::env::var("CANDLE_MEM_LENGTH") {
            self.mem_length = v
                .trim()
                .parse()
                .with_context(|| format!("CANDLE_MEM_LENGTH is not an integer: {v}"))?;
        }
        if let Ok(addr) = std::env::var("CANDLE_BIND_ADDR") {
            self.api_bind_addr = addr.trim().to_string();
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.resolution_secs == 0 {
            bail!("resolution_secs must be at least 1");
        }
        if self.mem_length == 0 {
            bail!("mem_length must be at least 1");
        }
        if self.hook_queue_capacity == 0 {
            bail!("hook_queue_capacity must be at least 1");
        }
        if self.feed_url().is_empty() {
            bail!("either feed_url or symbol must be set");
        }
        Ok(())
    }

    /// Websocket endpoint to consume, derived from `symbol` unless set.
    pub fn feed_url(&self) -> String {
        if !self.feed_url.is_empty() {
            return self.feed_url.clone();
        }
        if self.symbol.is_empty() {
            return String::new();
        }
        let lower = self.symbol.to_lowercase();
        format!("wss://stream.binance.com:9443/ws/{lower}@trade")
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_secs(self.resolution_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
