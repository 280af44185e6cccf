//! Fixed-rate tick scheduler for Roomcast's per-session state-sync loops.
//!
//! Each session runs one scheduler inside its actor's `tokio::select!`
//! loop; the tick drives the snapshot/diff broadcast. The scheduler
//! detects overruns and always skips ahead rather than bursting catch-up
//! ticks — a missed sync tick is made irrelevant by the next diff, so
//! replaying it would only waste budget.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => { /* handle commands */ }
//!         tick = scheduler.wait_for_tick() => {
//!             sync_state(tick);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! A rate of 0 disables the loop: [`TickScheduler::wait_for_tick`] pends
//! forever and `select!` just serves the other branches.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz. 0 disables the tick loop.
    pub rate_hz: u32,

    /// Budget warning threshold (0.0–1.0). A tracing warning is emitted
    /// when tick execution exceeds this fraction of the tick budget.
    pub budget_warn_threshold: f64,

    /// Random jitter (0–max µs) added to the *first* tick so sessions
    /// created in the same instant don't tick in phase.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            budget_warn_threshold: 0.80,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    /// Maximum supported tick rate.
    pub const MAX_RATE_HZ: u32 = 128;

    /// A config for a specific rate with default settings.
    pub fn with_rate(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called by [`TickScheduler::new`]: `rate_hz` is capped to
    /// [`Self::MAX_RATE_HZ`] (0 stays 0, meaning disabled) and the warn
    /// threshold is clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.rate_hz > Self::MAX_RATE_HZ {
            warn!(
                rate = self.rate_hz,
                max = Self::MAX_RATE_HZ,
                "tick rate exceeds maximum, clamping"
            );
            self.rate_hz = Self::MAX_RATE_HZ;
        }
        self.budget_warn_threshold =
            self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Duration of a single tick. `None` when the loop is disabled.
    pub fn tick_duration(&self) -> Option<Duration> {
        if self.rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.rate_hz as f64))
        }
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Information about one fired tick, returned by
/// [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,

    /// The fixed tick period.
    pub period: Duration,

    /// `true` if this tick fired noticeably late.
    pub overrun: bool,

    /// Ticks skipped because of the overrun (0 in normal operation).
    pub ticks_skipped: u64,
}

/// Runtime metrics for one scheduler.
///
/// Timing values refer to the work reported via
/// [`TickScheduler::record_tick_end`].
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Total ticks fired.
    pub total_ticks: u64,
    /// Total overruns detected.
    pub total_overruns: u64,
    /// Total ticks skipped while recovering from overruns.
    pub total_skipped: u64,
    /// Exponential moving average of tick execution time (α = 0.1).
    pub avg_tick_time: Duration,
    /// Maximum tick execution time observed.
    pub max_tick_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-rate tick scheduler. One per session actor.
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Option<Duration>,
    tick_count: u64,
    /// When the next tick should fire.
    next_tick: Option<TokioInstant>,
    /// When the current tick's work started; consumed by
    /// `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a scheduler from config.
    ///
    /// The first tick is scheduled with the configured jitter so that
    /// sessions created together spread their broadcasts out.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        let next_tick = tick_duration.map(|period| {
            let jitter = if config.initial_jitter_us > 0 {
                let us =
                    rand::rng().random_range(0..config.initial_jitter_us);
                Duration::from_micros(us)
            } else {
                Duration::ZERO
            };
            TokioInstant::now() + period + jitter
        });

        if config.rate_hz == 0 {
            debug!("tick scheduler created disabled (rate 0)");
        } else {
            debug!(
                rate_hz = config.rate_hz,
                budget_ms =
                    ?tick_duration.map(|d| d.as_secs_f64() * 1000.0),
                "tick scheduler created"
            );
        }

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// A scheduler for a specific rate with default settings.
    pub fn with_rate(rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(rate_hz))
    }

    /// Waits until the next tick is due.
    ///
    /// When disabled (`rate_hz == 0`) this future pends forever —
    /// `tokio::select!` keeps serving its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, period) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(period)) => (next, period),
            _ => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        // Overrun when we wake noticeably (>10% of the period) late.
        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;

        if overrun {
            ticks_skipped =
                late_by.as_nanos() as u64 / period.as_nanos() as u64;
            if ticks_skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "sync tick overrun, skipping ahead"
                );
            }
            self.metrics.total_overruns += 1;
            self.metrics.total_skipped += ticks_skipped;
        }

        // Always schedule from now, not from the missed deadline: the
        // next diff covers whatever the skipped ticks would have sent.
        self.next_tick = Some(now + period);
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "sync tick fired");

        TickInfo {
            tick: self.tick_count,
            period,
            overrun,
            ticks_skipped,
        }
    }

    /// Records that the current tick's work is done.
    ///
    /// Call after the sync broadcast returns; enables budget warnings and
    /// the timing metrics. Without it, neither fires.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if let Some(budget) = self.tick_duration {
            let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
            if utilization >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_secs_f64() * 1000.0,
                    utilization_pct =
                        format!("{:.1}", utilization * 100.0),
                    "sync tick approaching budget"
                );
            }
        }

        if elapsed > self.metrics.max_tick_time {
            self.metrics.max_tick_time = elapsed;
        }
        let alpha = 0.1;
        let prev = self.metrics.avg_tick_time.as_secs_f64();
        self.metrics.avg_tick_time = Duration::from_secs_f64(
            prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha,
        );
    }

    /// Whether the tick loop is disabled (rate 0).
    pub fn is_disabled(&self) -> bool {
        self.tick_duration.is_none()
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured rate in Hz.
    pub fn rate_hz(&self) -> u32 {
        self.config.rate_hz
    }

    /// The fixed tick period, or `None` when disabled.
    pub fn tick_duration(&self) -> Option<Duration> {
        self.tick_duration
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
