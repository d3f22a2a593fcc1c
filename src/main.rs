// =============================================================================
// Candle Engine — Main Entry Point
// =============================================================================
//
// Streams trades for one symbol, closes a candle every `resolution_secs`
// and logs each candle until Ctrl+C, then prints the shutdown summary.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use candle_engine::{EngineConfig, EngineService, LogHook};

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Candle Engine — Starting Up                       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    config.apply_env()?;

    info!(
        symbol = %config.symbol,
        feed_url = %config.feed_url(),
        resolution_secs = config.resolution_secs,
        mem_length = config.mem_length,
        "Engine configuration"
    );

    // ── 2. Start engine, feed, scheduler, hooks ──────────────────────────
    let log_hook = Arc::new(LogHook::new(config.log_ema_length));
    let handle = EngineService::new(config).hook(log_hook).start().await?;

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 3. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let summary = handle.shutdown().await;
    info!(summary = %summary, "Candle Engine shut down complete.");
    Ok(())
}
