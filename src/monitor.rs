//! One instrument, end to end.
//!
//! A monitor wires one [`Instrument`], one [`HistoryCache`], one optional
//! [`DurableLog`] and one [`SamplingScheduler`] together:
//!
//! ```text
//! tick ─► Instrument::acquire ─► Sample ─┬─► HistoryCache ─► display task
//!                                        └─► DurableLog (staging)
//! ```
//!
//! Shutdown runs in a fixed order: stop the display task, stop the scheduler
//! (waiting for an in-flight poll), send the instrument's cleanup command,
//! close the link, and finally recompress the logs once. If the poll task
//! panicked, the logs are still recompressed before the error is returned.

use crate::config::{InstrumentConfig, MonitorConfig};
use crate::data::{DurableLog, HistoryCache, Sample};
use crate::error::MonitorResult;
use crate::instruments::{self, Instrument};
use crate::scheduler::{PollTask, SamplingScheduler, SchedulerConfig, SchedulerStats};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::{wrappers::IntervalStream, StreamExt};

/// Everything a monitor run needs besides the connected instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorPlan {
    /// Instrument id, also the subsystem name of its log files.
    pub id: String,
    /// Sampling cadence.
    pub scheduler: SchedulerConfig,
    /// Samples kept for display.
    pub history_capacity: usize,
    /// Display refresh interval.
    pub display_interval: Duration,
    /// Log every sample at info level.
    pub print_samples: bool,
    /// `(directory, task)` of the durable log, `None` to keep nothing on disk.
    pub storage: Option<(PathBuf, String)>,
}

impl MonitorPlan {
    /// Plan for `instrument` under `config`.
    pub fn from_config(config: &MonitorConfig, instrument: &InstrumentConfig) -> Self {
        Self {
            id: instrument.id.clone(),
            scheduler: SchedulerConfig {
                interval: instrument.interval(),
                align_to_second: instrument.align_to_second,
            },
            history_capacity: instrument.history_capacity,
            display_interval: instrument.display_interval(),
            print_samples: instrument.print_samples,
            storage: config
                .storage
                .save_data
                .then(|| (config.storage.path.clone(), config.storage.task.clone())),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Scheduler counters.
    pub stats: SchedulerStats,
    /// Final log files written at shutdown.
    pub files: Vec<PathBuf>,
}

/// The per-tick work of a monitor.
pub struct MonitorTask {
    id: String,
    instrument: Box<dyn Instrument>,
    history: Arc<HistoryCache>,
    log: SharedLog,
    print_samples: bool,
}

/// Durable log shared between a [`MonitorTask`] and its owner.
pub type SharedLog = Arc<Mutex<Option<DurableLog>>>;

impl MonitorTask {
    /// Bundle the per-instrument state.
    pub fn new(
        id: impl Into<String>,
        instrument: Box<dyn Instrument>,
        history: Arc<HistoryCache>,
        log: Option<DurableLog>,
        print_samples: bool,
    ) -> Self {
        Self {
            id: id.into(),
            instrument,
            history,
            log: Arc::new(Mutex::new(log)),
            print_samples,
        }
    }

    /// Shared handle to the history window.
    pub fn history(&self) -> Arc<HistoryCache> {
        Arc::clone(&self.history)
    }

    /// Shared handle to the durable log, usable after the task is gone.
    pub fn log_handle(&self) -> SharedLog {
        Arc::clone(&self.log)
    }

    /// Cleanup command, close, then recompress.
    ///
    /// Cleanup and close failures are logged and do not stop the sequence,
    /// so the logs are recompressed even when the device has gone away.
    pub async fn shutdown(mut self) -> MonitorResult<Vec<PathBuf>> {
        if let Err(e) = self.instrument.cleanup().await {
            tracing::warn!(instrument = %self.id, error = %e, "cleanup command failed");
        }
        if let Err(e) = self.instrument.close().await {
            tracing::warn!(instrument = %self.id, error = %e, "close failed");
        }
        finish_log(&self.log)
    }
}

/// Recompress the shared log once. Later calls find it taken and do nothing.
fn finish_log(log: &SharedLog) -> MonitorResult<Vec<PathBuf>> {
    let taken = log.lock().take();
    match taken {
        Some(log) => log.finish(),
        None => Ok(Vec::new()),
    }
}

#[async_trait]
impl PollTask for MonitorTask {
    async fn poll(&mut self) -> anyhow::Result<()> {
        let timestamp = Local::now();
        let values = match self.instrument.acquire().await {
            Ok(values) => values,
            Err(e) => {
                if !e.is_recoverable() {
                    tracing::error!(instrument = %self.id, kind = e.kind(), error = %e, "acquisition failed");
                }
                return Err(e).with_context(|| format!("{} acquisition failed", self.id));
            }
        };

        let sample = Arc::new(Sample::new(
            self.instrument.schema().clone(),
            timestamp,
            values,
        )?);
        self.history.append(Arc::clone(&sample));

        if let Some(log) = self.log.lock().as_mut() {
            log.append(&sample)
                .with_context(|| format!("{} log append failed", self.id))?;
        }
        if self.print_samples {
            tracing::info!(instrument = %self.id, row = %sample.to_row().join(", "), "sample");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.id
    }
}

/// One display line: window fill plus the newest sample.
pub fn display_line(id: &str, history: &HistoryCache) -> Option<String> {
    let latest = history.latest()?;
    let fields: Vec<String> = latest
        .fields()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    Some(format!(
        "{id} [{}/{}] {} {}",
        history.len(),
        history.capacity(),
        latest.timestamp().format(crate::data::TIMESTAMP_FORMAT),
        fields.join(" ")
    ))
}

/// Live consumer of a history window.
pub struct DisplayHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DisplayHandle {
    /// Stop rendering and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "display task failed");
        }
    }
}

/// Spawn a task that logs the newest sample of `history` every `every`.
pub fn spawn_display(id: String, history: Arc<HistoryCache>, every: Duration) -> DisplayHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(interval);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                    match display_line(&id, &history) {
                        Some(line) => tracing::info!(target: "lab_monitor::display", "{line}"),
                        None => tracing::debug!(instrument = %id, "no samples yet"),
                    }
                }
            }
        }
    });
    DisplayHandle { stop, join }
}

/// Run a connected instrument until `shutdown` resolves.
pub async fn run_instrument<F>(
    instrument: Box<dyn Instrument>,
    plan: MonitorPlan,
    shutdown: F,
) -> anyhow::Result<RunSummary>
where
    F: Future<Output = ()>,
{
    if plan.display_interval.is_zero() {
        anyhow::bail!("display interval must be greater than zero");
    }
    let history = Arc::new(
        HistoryCache::new(plan.history_capacity).context("invalid history capacity")?,
    );
    let log = match &plan.storage {
        Some((dir, task)) => Some(
            DurableLog::new(dir.clone(), task.clone(), plan.id.clone(), instrument.schema())
                .context("invalid log location")?,
        ),
        None => None,
    };
    let scheduler = SamplingScheduler::new(plan.scheduler).context("invalid sampling interval")?;

    let task = MonitorTask::new(
        plan.id.clone(),
        instrument,
        Arc::clone(&history),
        log,
        plan.print_samples,
    );
    let log = task.log_handle();
    let handle = scheduler.start(task);
    let display = spawn_display(plan.id.clone(), history, plan.display_interval);
    tracing::info!(instrument = %plan.id, "monitor started");

    shutdown.await;
    tracing::info!(instrument = %plan.id, "shutdown requested");

    display.stop().await;
    let (task, stats) = match handle.shutdown().await {
        Ok(done) => done,
        Err(e) => {
            tracing::error!(instrument = %plan.id, error = %e, "poll task died");
            match finish_log(&log) {
                Ok(files) => {
                    tracing::info!(instrument = %plan.id, files = files.len(), "logs recompressed")
                }
                Err(finish) => {
                    tracing::warn!(instrument = %plan.id, error = %finish, "log recompression failed")
                }
            }
            return Err(e);
        }
    };
    let files = task
        .shutdown()
        .await
        .with_context(|| format!("{} log recompression failed", plan.id))?;

    tracing::info!(
        instrument = %plan.id,
        ticks = stats.ticks,
        failures = stats.failures,
        files = files.len(),
        "monitor stopped"
    );
    Ok(RunSummary { stats, files })
}

/// Connect the configured instrument `id` and run it until `shutdown`.
///
/// An invalid configuration or a connection failure is returned before
/// anything is scheduled.
pub async fn run<F>(config: &MonitorConfig, id: &str, shutdown: F) -> anyhow::Result<RunSummary>
where
    F: Future<Output = ()>,
{
    config.validate().context("invalid configuration")?;
    let instrument_config = config.instrument(id)?;
    let instrument = instruments::connect(instrument_config)
        .await
        .with_context(|| format!("failed to connect instrument '{id}'"))?;
    let plan = MonitorPlan::from_config(config, instrument_config);
    run_instrument(instrument, plan, shutdown).await
}
