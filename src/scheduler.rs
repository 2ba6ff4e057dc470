//! Fixed-cadence polling with skip-on-overlap.
//!
//! [`SamplingScheduler`] drives one [`PollTask`] from a single tokio task. A
//! tick that comes due while a poll is still running is skipped, never
//! queued, so polls of one task never overlap and never pile up behind a slow
//! instrument.
//!
//! The poll context is moved into the scheduler for the run and handed back
//! by [`SchedulerHandle::shutdown`], so the caller can run its cleanup on the
//! same state afterwards.
//!
//! ```rust,ignore
//! let scheduler = SamplingScheduler::new(SchedulerConfig::every(Duration::from_secs(1)))?;
//! let handle = scheduler.start(monitor_task);
//! tokio::signal::ctrl_c().await?;
//! let (monitor_task, stats) = handle.shutdown().await?;
//! ```

use crate::error::{MonitorError, MonitorResult};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Work performed on every tick.
#[async_trait]
pub trait PollTask: Send + 'static {
    /// Run one poll. An error is logged and counted; the schedule continues.
    async fn poll(&mut self) -> anyhow::Result<()>;

    /// Name used in log lines.
    fn name(&self) -> &str;
}

/// Cadence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Fire the first tick on the next whole wall-clock second instead of
    /// immediately.
    pub align_to_second: bool,
}

impl SchedulerConfig {
    /// Unaligned schedule at `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            align_to_second: false,
        }
    }
}

/// Counters for one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Polls started.
    pub ticks: u64,
    /// Polls that returned an error.
    pub failures: u64,
    /// Ticks dropped because a poll was in flight when they came due.
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Validated scheduler, ready to start a task.
#[derive(Debug, Clone)]
pub struct SamplingScheduler {
    config: SchedulerConfig,
}

impl SamplingScheduler {
    /// # Errors
    ///
    /// [`MonitorError::Configuration`] for a zero interval.
    pub fn new(config: SchedulerConfig) -> MonitorResult<Self> {
        if config.interval.is_zero() {
            return Err(MonitorError::Configuration(
                "sampling interval must be greater than zero".into(),
            ));
        }
        Ok(Self { config })
    }

    /// The cadence in use.
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Spawn the polling loop for `task`.
    pub fn start<T: PollTask>(&self, task: T) -> SchedulerHandle<T> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let join = tokio::spawn(run_loop(
            self.config,
            task,
            shutdown_rx,
            Arc::clone(&counters),
        ));
        SchedulerHandle {
            shutdown_tx,
            join,
            counters,
        }
    }
}

/// Handle to a running schedule.
pub struct SchedulerHandle<T> {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<T>,
    counters: Arc<Counters>,
}

impl<T: PollTask> SchedulerHandle<T> {
    /// Counters so far.
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Stop accepting ticks, wait for any in-flight poll, and return the
    /// task with the final counters.
    pub async fn shutdown(self) -> anyhow::Result<(T, SchedulerStats)> {
        // A send error only means the loop already exited.
        let _ = self.shutdown_tx.send(true);
        let task = self.join.await.context("scheduler task failed")?;
        Ok((task, self.counters.snapshot()))
    }
}

fn first_tick(align_to_second: bool) -> Instant {
    let now = Instant::now();
    if !align_to_second {
        return now;
    }
    let subsec = chrono::Local::now().timestamp_subsec_nanos();
    match subsec {
        0 => now,
        // Leap-second representation can exceed one second.
        n if n >= 1_000_000_000 => now,
        n => now + Duration::from_nanos(u64::from(1_000_000_000 - n)),
    }
}

async fn run_loop<T: PollTask>(
    config: SchedulerConfig,
    mut task: T,
    mut shutdown_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) -> T {
    let mut ticker = tokio::time::interval_at(first_tick(config.align_to_second), config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_poll_end: Option<Instant> = None;

    tracing::info!(
        task = task.name(),
        interval = ?config.interval,
        align_to_second = config.align_to_second,
        "scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            scheduled = ticker.tick() => {
                if last_poll_end.is_some_and(|end| scheduled < end) {
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(task = task.name(), "tick came due during a poll, skipped");
                    continue;
                }

                counters.ticks.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = task.poll().await {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(task = task.name(), error = %format!("{e:#}"), "poll failed");
                }
                last_poll_end = Some(Instant::now());
            }
        }
    }

    let stats = counters.snapshot();
    tracing::info!(
        task = task.name(),
        ticks = stats.ticks,
        failures = stats.failures,
        skipped = stats.skipped,
        "scheduler stopped"
    );
    task
}
