// =============================================================================
// Period Scheduler — epoch-aligned rollover timer
// =============================================================================
//
// A single task that sleeps until the next multiple of the resolution (on the
// Unix epoch, not on process start) and then runs exactly one rollover.
//
//   boundary_0 = (floor(now / R) + 1) * R
//   wait       = boundary - now            (recomputed every period)
//   boundary  += R                         (after each rollover)
//
// Each wait is measured against an absolute boundary, so scheduling jitter
// never accumulates into phase drift.  The next rollover is only armed once
// the previous one returned, so two rollovers can never run at once.  When a
// rollover finishes after the following boundary already passed, that
// boundary fires immediately instead of being dropped, up to
// `max_catch_up_periods` behind.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::CandleEngine;

/// First epoch-aligned boundary strictly after `now_ms`.
pub fn next_boundary_ms(now_ms: i64, resolution_ms: i64) -> i64 {
    (now_ms.div_euclid(resolution_ms) + 1) * resolution_ms
}

/// Time left until `boundary_ms`, zero if already passed.
pub fn wait_until(boundary_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(boundary_ms.saturating_sub(now_ms).max(0) as u64)
}

/// Where the scheduler goes after the rollover for one boundary returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextBoundary {
    /// The following boundary is still ahead.
    OnTime(i64),
    /// The following boundary already passed; fire it immediately.
    CatchUp { boundary: i64, behind: i64 },
    /// Too far behind; jump to the next wall-clock boundary.
    Resync { boundary: i64, skipped: i64 },
}

/// Plan the boundary after `fired` given the wall clock `now_ms`.
///
/// `max_catch_up == 0` disables resynchronisation.
pub fn next_after(fired: i64, now_ms: i64, resolution_ms: i64, max_catch_up: i64) -> NextBoundary {
    let boundary = fired + resolution_ms;
    if now_ms < boundary {
        return NextBoundary::OnTime(boundary);
    }
    let behind = (now_ms - boundary) / resolution_ms + 1;
    if max_catch_up > 0 && behind > max_catch_up {
        let resynced = next_boundary_ms(now_ms, resolution_ms);
        NextBoundary::Resync {
            boundary: resynced,
            skipped: (resynced - boundary) / resolution_ms,
        }
    } else {
        NextBoundary::CatchUp { boundary, behind }
    }
}

/// Epoch-aligned rollover timer for one engine.
///
/// Missed boundaries are closed one by one while the scheduler is at most
/// `max_catch_up_periods` (engine config) behind. Beyond that it jumps to the
/// next wall-clock boundary: the skipped boundaries produce no candles, their
/// ticks are folded into the next closed candle, and a warning names the
/// skipped count. Set `max_catch_up_periods = 0` to always catch up instead.
pub struct PeriodScheduler {
    engine: Arc<CandleEngine>,
    resolution_ms: i64,
    max_catch_up: i64,
}

impl PeriodScheduler {
    pub fn new(engine: Arc<CandleEngine>, resolution: Duration) -> Self {
        let resolution_ms = i64::try_from(resolution.as_millis()).unwrap_or(i64::MAX).max(1);
        let max_catch_up = i64::try_from(engine.config().max_catch_up_periods).unwrap_or(i64::MAX);
        Self {
            engine,
            resolution_ms,
            max_catch_up,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Fire rollovers until `shutdown` flips to `true`. A rollover already
    /// running is always allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut boundary = next_boundary_ms(now_ms(), self.resolution_ms);
        info!(
            resolution_ms = self.resolution_ms,
            first_boundary = boundary,
            "period scheduler started"
        );

        loop {
            let wait = wait_until(boundary, now_ms());
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
            }
            if *shutdown.borrow() {
                break;
            }
            // Timer woke ahead of the wall clock; sleep the remainder.
            if now_ms() < boundary {
                continue;
            }

            let engine = self.engine.clone();
            let closed_at = boundary;
            match tokio::task::spawn_blocking(move || engine.rollover_at(closed_at)).await {
                Ok(Some(candle)) => debug!(period = candle.period, boundary, "rollover complete"),
                Ok(None) => debug!(boundary, "rollover closed nothing"),
                Err(e) => error!(error = %e, boundary, "rollover task failed"),
            }

            boundary = match next_after(boundary, now_ms(), self.resolution_ms, self.max_catch_up) {
                NextBoundary::OnTime(next) => next,
                NextBoundary::CatchUp { boundary, behind } => {
                    warn!(
                        behind,
                        boundary,
                        "rollover finished after the next boundary; firing it now"
                    );
                    boundary
                }
                NextBoundary::Resync { boundary, skipped } => {
                    warn!(
                        skipped_periods = skipped,
                        next_boundary = boundary,
                        "scheduler fell too far behind the wall clock; resynchronising"
                    );
                    boundary
                }
            };
        }
        info!("period scheduler stopped");
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
