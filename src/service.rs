// =============================================================================
// Engine Service — wires feed, scheduler, hooks and API around one engine
// =============================================================================
//
// Start order: hooks subscribe first (so they see period 1), then the feed,
// the scheduler and the optional status API.  Shutdown reverses it: stop the
// feed and scheduler (a running rollover completes), close the engine, let
// hook workers drain what they already hold, stop the API.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api;
use crate::engine::CandleEngine;
use crate::hook::{spawn_hook, StrategyHook};
use crate::market_data::feed::run_feed;
use crate::market_data::TickIngestor;
use crate::runtime_config::EngineConfig;
use crate::scheduler::PeriodScheduler;
use crate::types::{ConnectionEvent, EngineSummary};

/// Builder for a running engine.
pub struct EngineService {
    config: EngineConfig,
    hooks: Vec<Arc<dyn StrategyHook>>,
    with_feed: bool,
    with_api: bool,
}

impl EngineService {
    pub fn new(config: EngineConfig) -> Self {
        let with_api = !config.api_bind_addr.is_empty();
        Self {
            config,
            hooks: Vec::new(),
            with_feed: true,
            with_api,
        }
    }

    pub fn hook(mut self, hook: Arc<dyn StrategyHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Run without connecting to the websocket feed; ticks come from
    /// [`EngineHandle::ingestor`] instead.
    pub fn without_feed(mut self) -> Self {
        self.with_feed = false;
        self
    }

    pub fn without_api(mut self) -> Self {
        self.with_api = false;
        self
    }

    /// Validate the configuration and start every task.
    pub async fn start(self) -> Result<EngineHandle> {
        self.config.validate().context("invalid engine config")?;

        // Bind before spawning anything so a bad address leaves nothing running.
        let listener = if self.with_api {
            let listener = tokio::net::TcpListener::bind(&self.config.api_bind_addr)
                .await
                .with_context(|| format!("failed to bind status API on {}", self.config.api_bind_addr))?;
            info!(addr = %self.config.api_bind_addr, "status API listening");
            Some(listener)
        } else {
            None
        };

        let engine = Arc::new(CandleEngine::new(self.config.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hooks = self
            .hooks
            .into_iter()
            .map(|hook| spawn_hook(&engine, hook))
            .collect();

        let monitor = tokio::spawn(log_connection_events(
            engine.subscribe_connections(),
            shutdown_rx.clone(),
        ));

        let ingestor = TickIngestor::new(engine.clone());
        let feed = self.with_feed.then(|| {
            tokio::spawn(run_feed(
                self.config.feed_url(),
                ingestor.clone(),
                self.config.reconnect_delay(),
                shutdown_rx.clone(),
            ))
        });

        let scheduler = PeriodScheduler::new(engine.clone(), self.config.resolution())
            .spawn(shutdown_rx.clone());

        let api = listener.map(|listener| {
            let app = api::rest::router(engine.clone());
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let stop = async move {
                    let _ = rx.changed().await;
                };
                if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
                    error!(error = %e, "status API failed");
                }
            })
        });

        info!(
            symbol = %self.config.symbol,
            resolution_secs = self.config.resolution_secs,
            mem_length = self.config.mem_length,
            feed = self.with_feed,
            "candle engine running"
        );

        Ok(EngineHandle {
            engine,
            ingestor,
            shutdown_tx,
            scheduler,
            feed,
            api,
            monitor,
            hooks,
        })
    }
}

/// A running engine and the tasks around it.
pub struct EngineHandle {
    engine: Arc<CandleEngine>,
    ingestor: TickIngestor,
    shutdown_tx: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    feed: Option<JoinHandle<()>>,
    api: Option<JoinHandle<()>>,
    monitor: JoinHandle<()>,
    hooks: Vec<JoinHandle<u64>>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<CandleEngine> {
        &self.engine
    }

    pub fn ingestor(&self) -> &TickIngestor {
        &self.ingestor
    }

    /// Stop every task and return the engine's final summary.
    pub async fn shutdown(self) -> EngineSummary {
        let _ = self.shutdown_tx.send(true);

        if let Some(feed) = self.feed {
            if let Err(e) = feed.await {
                warn!(error = %e, "feed task ended abnormally");
            }
        }
        if let Err(e) = self.scheduler.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }

        let summary = self.engine.shutdown();

        for hook in self.hooks {
            if let Err(e) = hook.await {
                warn!(error = %e, "hook worker ended abnormally");
            }
        }
        if let Some(api) = self.api {
            if let Err(e) = api.await {
                warn!(error = %e, "status API task ended abnormally");
            }
        }
        let _ = self.monitor.await;

        summary
    }
}

/// Log feed connection changes until shutdown.
async fn log_connection_events(
    mut events: tokio::sync::broadcast::Receiver<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected { url }) => info!(url = %url, "feed connected"),
                Ok(ConnectionEvent::Disconnected { url }) => warn!(url = %url, "feed disconnected"),
                Ok(ConnectionEvent::Error { url, message }) => {
                    warn!(url = %url, error = %message, "feed error")
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
