// =============================================================================
// Strategy Hooks — consumers of closed-candle events
// =============================================================================
//
// Every hook gets its own blocking worker and its own bounded receiver on the
// engine's candle queue.  A slow hook only falls behind on its own queue (the
// oldest events are dropped and a warning says how many); it never holds up
// ticks, rollovers or other hooks.  Within one hook, events always arrive in
// increasing period order.
// =============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{CandleEngine, CandleEvent};
use crate::types::Series;

/// Receives one call per closed period with the candle and a read-only
/// history snapshot.
pub trait StrategyHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn on_candle(&self, event: &CandleEvent);
}

/// Subscribe `hook` to `engine` and run it on a dedicated blocking worker.
///
/// The worker ends when the engine shuts down; the handle yields the number
/// of events delivered.
pub fn spawn_hook(engine: &CandleEngine, hook: Arc<dyn StrategyHook>) -> JoinHandle<u64> {
    let mut rx = engine.subscribe();
    tokio::task::spawn_blocking(move || {
        let mut delivered = 0u64;
        loop {
            match rx.blocking_recv() {
                Ok(event) => {
                    let period = event.candle.period;
                    if catch_unwind(AssertUnwindSafe(|| hook.on_candle(&event))).is_err() {
                        error!(hook = hook.name(), period, "strategy hook panicked; continuing");
                    }
                    delivered += 1;
                }
                Err(RecvError::Lagged(dropped)) => {
                    warn!(
                        hook = hook.name(),
                        dropped,
                        "strategy hook fell behind; oldest candle events dropped"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(hook = hook.name(), delivered, "strategy hook worker finished");
        delivered
    })
}

// =============================================================================
// LogHook — prints each closed candle and a close-price EMA
// =============================================================================

/// Logs every closed candle, plus the EMA of closes once the history is deep
/// enough for `ema_length`.
pub struct LogHook {
    ema_length: usize,
}

impl LogHook {
    pub fn new(ema_length: usize) -> Self {
        Self { ema_length }
    }

    /// EMA over the event's close history, `None` while history is short.
    pub fn ema(&self, event: &CandleEvent) -> Option<f64> {
        event.history.ema(Series::Close, self.ema_length).ok()
    }
}

impl StrategyHook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    fn on_candle(&self, event: &CandleEvent) {
        let c = &event.candle;
        info!(
            period = c.period,
            open = c.open,
            close = c.close,
            high = c.high,
            low = c.low,
            "candle"
        );
        if let Some(ema) = self.ema(event) {
            info!(period = c.period, length = self.ema_length, ema, "close EMA");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::runtime_config::EngineConfig;

    #[derive(Default)]
    struct Recorder {
        periods: Mutex<Vec<u64>>,
    }

    impl StrategyHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_candle(&self, event: &CandleEvent) {
            self.periods.lock().push(event.candle.period);
        }
    }

    struct Panicky;

    impl StrategyHook for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn on_candle(&self, event: &CandleEvent) {
            if event.candle.period == 1 {
                panic!("boom");
            }
        }
    }

    struct Sleepy;

    impl StrategyHook for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn on_candle(&self, _event: &CandleEvent) {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    fn close_periods(engine: &CandleEngine, n: usize) {
        for i in 1..=n {
            engine.on_tick(i as f64);
            engine.rollover();
        }
    }

    #[tokio::test]
    async fn hook_sees_every_period_in_order() {
        let engine = CandleEngine::new(EngineConfig::default());
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_hook(&engine, recorder.clone());

        close_periods(&engine, 10);
        engine.shutdown();

        assert_eq!(handle.await.unwrap(), 10);
        assert_eq!(*recorder.periods.lock(), (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn panicking_hook_keeps_receiving() {
        let engine = CandleEngine::new(EngineConfig::default());
        let handle = spawn_hook(&engine, Arc::new(Panicky));
        close_periods(&engine, 3);
        engine.shutdown();
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn slow_hook_does_not_block_rollover() {
        let engine = CandleEngine::new(EngineConfig {
            hook_queue_capacity: 2,
            ..EngineConfig::default()
        });
        let handle = spawn_hook(&engine, Arc::new(Sleepy));

        let started = std::time::Instant::now();
        close_periods(&engine, 20);
        // Dispatching inline would take 20 x 200ms.
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(2_000), "took {elapsed:?}");
        assert_eq!(engine.periods_closed(), 20);

        engine.shutdown();
        // Everything the worker was too slow for was dropped.
        let delivered = handle.await.unwrap();
        assert!((1..20).contains(&delivered), "delivered {delivered}");
    }

    #[test]
    fn log_hook_ema_needs_length_plus_one_periods() {
        let engine = CandleEngine::new(EngineConfig::default());
        let mut rx = engine.subscribe();
        let hook = LogHook::new(11);

        close_periods(&engine, 11);
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            assert!(hook.ema(&event).is_none());
            last = Some(event);
        }
        assert_eq!(last.map(|e| e.candle.period), Some(11));

        close_periods(&engine, 1);
        let event = rx.try_recv().unwrap();
        assert!(hook.ema(&event).is_some());
        hook.on_candle(&event);
    }
}
