// ============================================================================
// SCHEDULER
// ============================================================================
// Drives cycles from a single timer with at most one cycle in flight. A tick
// that fires while a cycle is still running is skipped and counted as missed.
// Every finished cycle goes to the outcome reporter and the health tracker.
// ============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GeneralConfig;
use crate::error::{EtlError, EtlResult};
use crate::pipeline::{CycleOutcome, CycleStatus, Pipeline};

// ----------------------------------------------------------------------------
// 10.1 Outcome Reporting
// ----------------------------------------------------------------------------

/// Consumer of cycle outcomes.
pub trait OutcomeReporter: Send + Sync {
    fn report(&self, outcome: &CycleOutcome);

    /// A tick was skipped because the previous cycle was still running.
    fn missed_tick(&self, total: u64) {
        let _ = total;
    }
}

/// Logs every outcome through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl OutcomeReporter for TracingReporter {
    fn report(&self, outcome: &CycleOutcome) {
        for task in outcome.failed_tasks() {
            for failure in &task.extraction_errors {
                warn!(
                    target: "metrics_etl::scheduler",
                    cycle_id = %outcome.cycle_id,
                    task = %task.task_id,
                    source = %failure.source,
                    series = %failure.series,
                    kind = %failure.error.kind(),
                    retryable = failure.error.is_retryable(),
                    "Extraction failed: {}",
                    failure.error
                );
            }
            if let Some(failure) = &task.transform_error {
                warn!(
                    target: "metrics_etl::scheduler",
                    cycle_id = %outcome.cycle_id,
                    task = %task.task_id,
                    stage = failure.stage,
                    transform = %failure.transform,
                    kind = %failure.error.kind(),
                    "Transform failed: {}",
                    failure.error
                );
            }
            for failure in &task.load_errors {
                warn!(
                    target: "metrics_etl::scheduler",
                    cycle_id = %outcome.cycle_id,
                    task = %task.task_id,
                    destination = %failure.destination,
                    series = %failure.series,
                    kind = %failure.error.kind(),
                    retryable = failure.error.is_retryable(),
                    "Load failed: {}",
                    failure.error
                );
            }
            if let Some(panic) = &task.panic {
                error!(
                    target: "metrics_etl::scheduler",
                    cycle_id = %outcome.cycle_id,
                    task = %task.task_id,
                    "Task panicked: {}",
                    panic
                );
            }
        }

        let failed = outcome.failed_tasks().count();
        match outcome.status {
            CycleStatus::Completed => info!(
                target: "metrics_etl::scheduler",
                cycle_id = %outcome.cycle_id,
                tasks = outcome.tasks.len(),
                failed,
                elapsed_ms = outcome.elapsed_ms,
                cache_hits = outcome.cache.hits,
                cache_misses = outcome.cache.misses,
                "Cycle completed"
            ),
            CycleStatus::TimedOut => error!(
                target: "metrics_etl::scheduler",
                cycle_id = %outcome.cycle_id,
                finished = outcome.tasks.len(),
                failed,
                timed_out = ?outcome.timed_out,
                elapsed_ms = outcome.elapsed_ms,
                "Cycle timed out"
            ),
        }
    }

    fn missed_tick(&self, total: u64) {
        warn!(
            target: "metrics_etl::scheduler",
            missed_total = total,
            "Tick skipped, previous cycle still running"
        );
    }
}

// ----------------------------------------------------------------------------
// 10.2 Health Tracking
// ----------------------------------------------------------------------------

/// Readiness and health derived from recent cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// At least one cycle has finished
    pub ready: bool,
    /// Ready, and none of the recent cycles timed out
    pub healthy: bool,
    /// Oldest first
    pub last_statuses: Vec<CycleStatus>,
    pub missed_ticks: u64,
    pub cycles_run: u64,
}

/// Sliding window over the statuses of the last N cycles.
#[derive(Debug)]
pub struct HealthTracker {
    window: usize,
    statuses: Mutex<VecDeque<CycleStatus>>,
    missed: AtomicU64,
    cycles: AtomicU64,
}

impl HealthTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            statuses: Mutex::new(VecDeque::with_capacity(window)),
            missed: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn record(&self, status: CycleStatus) {
        let mut statuses = self.statuses.lock();
        if statuses.len() == self.window {
            statuses.pop_front();
        }
        statuses.push_back(status);
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a missed tick, returning the new total.
    pub fn record_missed(&self) -> u64 {
        self.missed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn report(&self) -> HealthReport {
        let statuses = self.statuses.lock();
        let ready = !statuses.is_empty();
        HealthReport {
            ready,
            healthy: ready && statuses.iter().all(|s| *s == CycleStatus::Completed),
            last_statuses: statuses.iter().copied().collect(),
            missed_ticks: self.missed.load(Ordering::Relaxed),
            cycles_run: self.cycles.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// 10.3 Scheduler
// ----------------------------------------------------------------------------

/// Tick timing of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Longest wait for the in-flight cycle on shutdown
    pub shutdown_timeout: Duration,
    /// Fire the first tick at start instead of one interval later
    pub run_immediately: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &GeneralConfig) -> Self {
        Self {
            interval: config.interval(),
            shutdown_timeout: config.shutdown_timeout(),
            run_immediately: config.run_immediately,
        }
    }
}

enum LoopEvent {
    Shutdown,
    Finished(Result<CycleOutcome, JoinError>),
    Tick,
}

/// Repeats pipeline cycles on a fixed interval.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: SchedulerSettings,
    reporter: Arc<dyn OutcomeReporter>,
    health: Arc<HealthTracker>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        settings: SchedulerSettings,
        reporter: Arc<dyn OutcomeReporter>,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            pipeline,
            settings,
            reporter,
            health,
        }
    }

    pub fn health(&self) -> HealthReport {
        self.health.report()
    }

    /// Run a single cycle now and report it.
    pub async fn run_once(&self) -> CycleOutcome {
        let outcome = self.pipeline.run_cycle().await;
        self.finish(&outcome);
        outcome
    }

    /// Tick until `shutdown` fires, then drain the in-flight cycle.
    pub async fn run(&self, shutdown: CancellationToken) -> EtlResult<()> {
        let start = if self.settings.run_immediately {
            Instant::now()
        } else {
            Instant::now() + self.settings.interval
        };
        let mut ticker = interval_at(start, self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "metrics_etl::scheduler",
            interval_ms = self.settings.interval.as_millis() as u64,
            tasks = self.pipeline.len(),
            "Scheduler started"
        );

        let mut current: Option<JoinHandle<CycleOutcome>> = None;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => LoopEvent::Shutdown,
                result = join_cycle(&mut current) => LoopEvent::Finished(result),
                _ = ticker.tick() => LoopEvent::Tick,
            };

            match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Finished(result) => {
                    current = None;
                    self.handle_finished(result);
                }
                LoopEvent::Tick if current.is_some() => {
                    let total = self.health.record_missed();
                    self.reporter.missed_tick(total);
                }
                LoopEvent::Tick => {
                    let pipeline = Arc::clone(&self.pipeline);
                    current = Some(tokio::spawn(async move { pipeline.run_cycle().await }));
                }
            }
        }

        info!(target: "metrics_etl::scheduler", "Scheduler stopping");
        self.drain(current).await
    }

    async fn drain(&self, current: Option<JoinHandle<CycleOutcome>>) -> EtlResult<()> {
        let Some(mut handle) = current else {
            return Ok(());
        };

        debug!(
            target: "metrics_etl::scheduler",
            timeout_ms = self.settings.shutdown_timeout.as_millis() as u64,
            "Draining in-flight cycle"
        );
        match tokio::time::timeout(self.settings.shutdown_timeout, &mut handle).await {
            Ok(result) => {
                self.handle_finished(result);
                Ok(())
            }
            Err(_) => {
                handle.abort();
                Err(EtlError::Internal(format!(
                    "in-flight cycle did not finish within {}s of shutdown",
                    self.settings.shutdown_timeout.as_secs()
                )))
            }
        }
    }

    fn handle_finished(&self, result: Result<CycleOutcome, JoinError>) {
        match result {
            Ok(outcome) => self.finish(&outcome),
            Err(e) => error!(target: "metrics_etl::scheduler", error = %e, "Cycle task failed"),
        }
    }

    fn finish(&self, outcome: &CycleOutcome) {
        self.health.record(outcome.status);
        self.reporter.report(outcome);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .field("health", &self.health.report())
            .finish()
    }
}

/// Resolve when the in-flight cycle finishes; pend forever when idle.
async fn join_cycle(
    current: &mut Option<JoinHandle<CycleOutcome>>,
) -> Result<CycleOutcome, JoinError> {
    match current {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
