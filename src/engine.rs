// =============================================================================
// Candle Engine — period state, rollover, bounded history
// =============================================================================
//
// One engine instance per instrument, built from an `EngineConfig` and shared
// via `Arc<CandleEngine>` between the feed task, the scheduler task, hook
// workers and API handlers.
//
// Thread safety:
//   - parking_lot::Mutex over the whole PeriodState (never per field).
//   - parking_lot::RwLock over the whole HistoryStore.
//   - parking_lot::Mutex<()> gate; holding it is the right to close a
//     period.  Only rollover and shutdown take it, so a failed try_lock
//     always means a second rollover trigger.
//   - parking_lot::Mutex over the rollover ledger (period counter, last
//     candle, hook sender), also read by API handlers and subscribers.
//     Lock order is gate -> ledger -> period -> history.
//   - Atomic counters for tick statistics.
//
// Readers only ever receive snapshots.  A rollover reads the period, appends
// to history and reseeds the period while holding both locks, so no reader
// can pair a reseeded period with the previous period's history or the other
// way round.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::market_data::{HistorySnapshot, HistoryStore, PeriodSnapshot, PeriodState};
use crate::runtime_config::EngineConfig;
use crate::types::{ClosedCandle, ConnectionEvent, EngineSummary};

/// Buffered connection notifications per subscriber.
const CONNECTION_EVENT_CAPACITY: usize = 32;

// =============================================================================
// Events & views
// =============================================================================

/// Published once per closed period, in period order.
#[derive(Debug, Clone)]
pub struct CandleEvent {
    pub candle: ClosedCandle,
    /// History as it stood right after `candle` was appended.
    pub history: HistorySnapshot,
}

/// Period and history captured together under one lock acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct EngineView {
    pub period: PeriodSnapshot,
    pub history: HistorySnapshot,
}

impl EngineView {
    /// Closed-period closes followed by the in-progress price, if any.
    pub fn live_closes(&self) -> Vec<f64> {
        let mut closes = self.history.closes().to_vec();
        if let Some(price) = self.period.last_price {
            closes.push(price);
        }
        closes
    }
}

// =============================================================================
// Rollover ledger
// =============================================================================

struct RolloverLedger {
    /// Periods closed so far; the next candle gets `period + 1`.
    period: u64,
    last_candle: Option<ClosedCandle>,
    /// Taken on shutdown so hook receivers observe a closed channel.
    candle_tx: Option<broadcast::Sender<CandleEvent>>,
}

// =============================================================================
// CandleEngine
// =============================================================================

pub struct CandleEngine {
    config: EngineConfig,
    period: Mutex<PeriodState>,
    history: RwLock<HistoryStore>,
    rolling: Mutex<()>,
    rollover: Mutex<RolloverLedger>,
    connection_tx: broadcast::Sender<ConnectionEvent>,
    ticks_applied: AtomicU64,
    ticks_discarded: AtomicU64,
    overlapping_rollovers: AtomicU64,
}

impl CandleEngine {
    /// Build an engine from `config`. History capacity is `mem_length`, the
    /// hook queue holds `hook_queue_capacity` events per subscriber.
    pub fn new(config: EngineConfig) -> Self {
        let (candle_tx, _) = broadcast::channel(config.hook_queue_capacity.max(1));
        let (connection_tx, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        Self {
            period: Mutex::new(PeriodState::new()),
            history: RwLock::new(HistoryStore::new(config.mem_length)),
            rolling: Mutex::new(()),
            rollover: Mutex::new(RolloverLedger {
                period: 0,
                last_candle: None,
                candle_tx: Some(candle_tx),
            }),
            connection_tx,
            ticks_applied: AtomicU64::new(0),
            ticks_discarded: AtomicU64::new(0),
            overlapping_rollovers: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Ticks ───────────────────────────────────────────────────────────

    /// Fold one price into whichever period is open when the period lock is
    /// acquired. Non-finite prices are discarded; zero and negative prices
    /// are valid (instruments can trade below zero).
    ///
    /// Returns whether the price was applied.
    pub fn on_tick(&self, price: f64) -> bool {
        if !price.is_finite() {
            self.record_discarded();
            debug!(price, "discarding invalid tick price");
            return false;
        }
        self.period.lock().apply(price);
        self.ticks_applied.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Count a feed message that never produced a price.
    pub fn record_discarded(&self) {
        self.ticks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    // ── Rollover ────────────────────────────────────────────────────────

    /// Close the open period at the current wall-clock time.
    pub fn rollover(&self) -> Option<ClosedCandle> {
        self.rollover_at(Utc::now().timestamp_millis())
    }

    /// Close the open period, stamping the candle with `closed_at` (epoch ms).
    ///
    /// Blocks while another rollover is in flight. Returns `None` when no
    /// tick has ever been received or the engine has been shut down.
    pub fn rollover_at(&self, closed_at: i64) -> Option<ClosedCandle> {
        let _rolling = match self.rolling.try_lock() {
            Some(guard) => guard,
            None => {
                self.overlapping_rollovers.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let guard = self.rolling.lock();
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "rollover requested while another was in flight; waited for it"
                );
                guard
            }
        };
        let mut ledger = self.rollover.lock();

        let Some(candle_tx) = ledger.candle_tx.clone() else {
            debug!("rollover after shutdown ignored");
            return None;
        };

        let (candle, history) = {
            let mut period = self.period.lock();
            let mut history = self.history.write();

            let Some(closed) = period.close_and_reseed() else {
                debug!("no tick received yet; nothing to close");
                return None;
            };

            let open = history.last_close().unwrap_or(closed.close);
            history.append(closed.close, closed.high, closed.low);

            let candle = ClosedCandle {
                period: ledger.period + 1,
                open,
                high: closed.high,
                low: closed.low,
                close: closed.close,
                tick_count: closed.tick_count,
                closed_at,
            };
            (candle, history.snapshot())
        };

        ledger.period += 1;
        ledger.last_candle = Some(candle);

        info!(
            period = candle.period,
            open = candle.open,
            high = candle.high,
            low = candle.low,
            close = candle.close,
            ticks = candle.tick_count,
            "period closed"
        );

        // Sent under the ledger lock so events leave in period order. An
        // error only means nobody is subscribed.
        if candle_tx.send(CandleEvent { candle, history }).is_err() {
            debug!(period = candle.period, "no hook subscribed to closed candle");
        }

        Some(candle)
    }

    // ── Readers ─────────────────────────────────────────────────────────

    /// Immutable copy of the closed-period history.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.read().snapshot()
    }

    /// Immutable copy of the in-progress period.
    pub fn period_snapshot(&self) -> PeriodSnapshot {
        self.period.lock().snapshot()
    }

    /// Period and history taken together, consistent with each other.
    pub fn view(&self) -> EngineView {
        let period = self.period.lock();
        let history = self.history.read();
        EngineView {
            period: period.snapshot(),
            history: history.snapshot(),
        }
    }

    pub fn periods_closed(&self) -> u64 {
        self.rollover.lock().period
    }

    pub fn ticks_applied(&self) -> u64 {
        self.ticks_applied.load(Ordering::Relaxed)
    }

    pub fn ticks_discarded(&self) -> u64 {
        self.ticks_discarded.load(Ordering::Relaxed)
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Receive every closed-candle event published after this call.
    ///
    /// The queue is bounded; a receiver that falls behind loses the oldest
    /// events (`RecvError::Lagged`). After shutdown the receiver is closed.
    pub fn subscribe(&self) -> broadcast::Receiver<CandleEvent> {
        match self.rollover.lock().candle_tx.as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Receive feed connection notifications.
    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_tx.subscribe()
    }

    /// Forward a notification from the feed. Informational only.
    pub fn notify_connection(&self, event: ConnectionEvent) {
        let _ = self.connection_tx.send(event);
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Stop accepting rollovers and report final state.
    ///
    /// Waits for any in-flight rollover, closes the hook queue and returns a
    /// summary. Calling it again returns the same summary.
    pub fn shutdown(&self) -> EngineSummary {
        let _rolling = self.rolling.lock();
        let mut ledger = self.rollover.lock();
        let was_open = ledger.candle_tx.take().is_some();

        let summary = EngineSummary {
            periods_closed: ledger.period,
            ticks_applied: self.ticks_applied(),
            ticks_discarded: self.ticks_discarded(),
            overlapping_rollovers: self.overlapping_rollovers.load(Ordering::Relaxed),
            history_len: self.history.read().len(),
            last_candle: ledger.last_candle,
        };

        if was_open {
            info!(
                periods_closed = summary.periods_closed,
                ticks_applied = summary.ticks_applied,
                ticks_discarded = summary.ticks_discarded,
                overlapping_rollovers = summary.overlapping_rollovers,
                history_len = summary.history_len,
                last_close = ?summary.last_candle.map(|c| c.close),
                "engine shut down"
            );
        }
        summary
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::types::Series;

    fn engine(mem_length: usize) -> CandleEngine {
        CandleEngine::new(EngineConfig {
            mem_length,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn scenario_single_period_candle() {
        let engine = engine(10);
        for price in [10.0, 12.0, 9.0, 11.0] {
            assert!(engine.on_tick(price));
        }
        let candle = engine.rollover_at(60_000).unwrap();
        assert_eq!(candle.period, 1);
        // First period has no prior close.
        assert_eq!(candle.open, 11.0);
        assert_eq!(candle.high, 12.0);
        assert_eq!(candle.low, 9.0);
        assert_eq!(candle.close, 11.0);
        assert_eq!(candle.tick_count, 4);
        assert_eq!(candle.closed_at, 60_000);
    }

    #[test]
    fn open_is_previous_close() {
        let engine = engine(10);
        engine.on_tick(100.0);
        engine.rollover();
        engine.on_tick(105.0);
        engine.on_tick(95.0);
        let second = engine.rollover().unwrap();
        assert_eq!(second.open, 100.0);
        assert_eq!(second.close, 95.0);
        // Reseeded extrema at 100 carry into the next period.
        assert_eq!(second.high, 105.0);
        assert_eq!(second.low, 95.0);
    }

    #[test]
    fn rollover_reseeds_on_close() {
        let engine = engine(10);
        for price in [10.0, 12.0, 9.0, 11.0] {
            engine.on_tick(price);
        }
        engine.rollover();
        let p = engine.period_snapshot();
        assert_eq!(p.running_high, Some(11.0));
        assert_eq!(p.running_low, Some(11.0));
        assert_eq!(p.last_price, Some(11.0));
        assert_eq!(p.tick_count, 0);
    }

    #[test]
    fn quiet_period_produces_flat_candle() {
        let engine = engine(10);
        engine.on_tick(50.0);
        engine.rollover();
        let flat = engine.rollover().unwrap();
        assert_eq!((flat.open, flat.high, flat.low, flat.close), (50.0, 50.0, 50.0, 50.0));
        assert_eq!(flat.tick_count, 0);
    }

    #[test]
    fn rollover_before_first_tick_closes_nothing() {
        let engine = engine(10);
        assert!(engine.rollover().is_none());
        assert_eq!(engine.periods_closed(), 0);
        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn fifo_after_mem_length_plus_k_rollovers() {
        let engine = engine(3);
        for i in 1..=5 {
            engine.on_tick(i as f64);
            engine.rollover();
        }
        let snap = engine.snapshot();
        assert_eq!(snap.closes(), &[3.0, 4.0, 5.0]);
        assert_eq!(snap.highs().len(), 3);
        assert_eq!(snap.lows().len(), 3);
        assert_eq!(engine.periods_closed(), 5);
    }

    #[test]
    fn invalid_prices_are_discarded() {
        let engine = engine(3);
        assert!(!engine.on_tick(f64::NAN));
        assert!(!engine.on_tick(f64::INFINITY));
        assert!(!engine.on_tick(f64::NEG_INFINITY));
        assert_eq!(engine.ticks_discarded(), 3);
        assert_eq!(engine.ticks_applied(), 0);
        assert_eq!(engine.period_snapshot().last_price, None);
    }

    #[test]
    fn zero_and_negative_prices_are_applied() {
        let engine = engine(3);
        assert!(engine.on_tick(2.5));
        assert!(engine.on_tick(0.0));
        assert!(engine.on_tick(-37.63));
        let candle = engine.rollover().unwrap();
        assert_eq!((candle.high, candle.low, candle.close), (2.5, -37.63, -37.63));
        assert_eq!(candle.tick_count, 3);
        assert_eq!(engine.ticks_discarded(), 0);
    }

    #[test]
    fn insufficient_history_leaves_history_unchanged() {
        let engine = engine(10);
        for i in 1..=5 {
            engine.on_tick(i as f64);
            engine.rollover();
        }
        let before = engine.snapshot();
        let err = before.sma(Series::Close, 10, 0).unwrap_err();
        assert!(matches!(
            err,
            crate::indicators::IndicatorError::InsufficientHistory { required: 10, available: 5 }
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn live_closes_append_running_price() {
        let engine = engine(10);
        engine.on_tick(1.0);
        engine.rollover();
        engine.on_tick(2.0);
        let view = engine.view();
        assert_eq!(view.live_closes(), vec![1.0, 2.0]);
    }

    #[test]
    fn events_arrive_in_period_order() {
        let engine = engine(4);
        let mut rx = engine.subscribe();
        for i in 1..=6 {
            engine.on_tick(i as f64 * 10.0);
            engine.rollover();
        }
        let mut last = 0;
        for _ in 0..6 {
            let event = rx.try_recv().unwrap();
            assert!(event.candle.period > last);
            last = event.candle.period;
            assert_eq!(event.history.closes().last(), Some(&event.candle.close));
            assert!(event.history.len() <= 4);
        }
        assert_eq!(last, 6);
    }

    #[test]
    fn slow_subscriber_loses_oldest_events() {
        let engine = CandleEngine::new(EngineConfig {
            hook_queue_capacity: 2,
            ..EngineConfig::default()
        });
        let mut rx = engine.subscribe();
        for i in 1..=5 {
            engine.on_tick(i as f64);
            engine.rollover();
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        assert_eq!(rx.try_recv().unwrap().candle.period, 4);
        assert_eq!(rx.try_recv().unwrap().candle.period, 5);
    }

    #[test]
    fn second_rollover_waits_for_first() {
        let engine = Arc::new(engine(10));
        engine.on_tick(1.0);

        let guard = engine.rolling.lock();
        let worker = {
            let engine = engine.clone();
            thread::spawn(move || engine.rollover())
        };
        thread::sleep(Duration::from_millis(50));
        // Still blocked: nothing closed while the gate is held.
        assert_eq!(engine.periods_closed(), 0);
        drop(guard);

        let candle = worker.join().unwrap().unwrap();
        assert_eq!(candle.period, 1);
        assert_eq!(engine.shutdown().overlapping_rollovers, 1);
    }

    #[test]
    fn readers_during_rollover_are_not_overlaps() {
        let engine = Arc::new(engine(8));
        engine.on_tick(1.0);
        const ROLLOVERS: u64 = 20_000;

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let engine = engine.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut seen = 0;
                while !done.load(Ordering::Relaxed) {
                    let closed = engine.periods_closed();
                    assert!(closed >= seen);
                    seen = closed;
                    drop(engine.subscribe());
                }
            })
        };

        for _ in 0..ROLLOVERS {
            engine.rollover();
        }
        done.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        let summary = engine.shutdown();
        assert_eq!(summary.periods_closed, ROLLOVERS);
        assert_eq!(summary.overlapping_rollovers, 0);
    }

    #[test]
    fn concurrent_ticks_are_never_lost_or_doubled() {
        let engine = Arc::new(engine(1_000));
        let mut rx = engine.subscribe();
        const WRITERS: usize = 4;
        const TICKS_PER_WRITER: usize = 5_000;

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let engine = engine.clone();
                thread::spawn(move || {
                    for i in 0..TICKS_PER_WRITER {
                        engine.on_tick(100.0 + ((w * 7 + i) % 50) as f64);
                    }
                })
            })
            .collect();

        let roller = {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    engine.rollover();
                    thread::yield_now();
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        roller.join().unwrap();

        let mut counted = 0;
        while let Ok(event) = rx.try_recv() {
            let c = event.candle;
            assert!(c.low <= c.close && c.close <= c.high);
            counted += c.tick_count;
        }
        counted += engine.period_snapshot().tick_count;
        assert_eq!(counted as usize, WRITERS * TICKS_PER_WRITER);

        let snap = engine.snapshot();
        assert_eq!(snap.closes().len(), snap.highs().len());
        assert_eq!(snap.highs().len(), snap.lows().len());
    }

    #[test]
    fn concurrent_readers_never_see_torn_view() {
        let engine = Arc::new(engine(16));
        engine.on_tick(100.0);
        engine.rollover();

        let writer = {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    engine.on_tick(100.0 + (i % 13) as f64);
                    if i % 10 == 0 {
                        engine.rollover();
                    }
                }
            })
        };

        for _ in 0..2_000 {
            let view = engine.view();
            let p = view.period;
            if let (Some(lo), Some(last), Some(hi)) = (p.running_low, p.last_price, p.running_high) {
                assert!(lo <= last && last <= hi);
            }
            // Freshly reseeded period is centred on the newest close.
            if p.tick_count == 0 {
                let newest = *view.history.closes().last().unwrap();
                assert_eq!(p.running_high, Some(newest));
                assert_eq!(p.running_low, Some(newest));
            }
            let h = &view.history;
            assert_eq!(h.closes().len(), h.highs().len());
            assert_eq!(h.highs().len(), h.lows().len());
        }
        writer.join().unwrap();
    }

    #[test]
    fn shutdown_closes_queue_and_stops_rollovers() {
        let engine = engine(10);
        let mut rx = engine.subscribe();
        engine.on_tick(3.0);
        engine.rollover();

        let summary = engine.shutdown();
        assert_eq!(summary.periods_closed, 1);
        assert_eq!(summary.ticks_applied, 1);
        assert_eq!(summary.history_len, 1);
        assert_eq!(summary.last_candle.map(|c| c.close), Some(3.0));

        assert!(engine.rollover().is_none());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        assert!(matches!(
            engine.subscribe().try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        assert_eq!(engine.shutdown(), summary);
    }
}
