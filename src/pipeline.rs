// ============================================================================
// PIPELINE ORCHESTRATOR
// ============================================================================
// One cycle: fresh cache, every task dispatched onto a bounded worker pool,
// outcomes collected until all tasks finish or the deadline passes. On the
// deadline the cycle is cancelled, stragglers get a grace period, and
// anything still running after that is aborted.
// ============================================================================

use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::config::GeneralConfig;
use crate::executor::{ComposedTask, CycleContext};
use crate::logging::PerfTimer;
use crate::task::{TaskId, TaskOutcome};
use crate::types::Timestamp;
use crate::SLOW_CYCLE_FRACTION;

// ----------------------------------------------------------------------------
// 9.1 Cycle Outcome
// ----------------------------------------------------------------------------

/// Terminal state of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    TimedOut,
}

impl Display for CycleStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Completed => write!(f, "completed"),
            CycleStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub started_at: Timestamp,
    pub elapsed_ms: u64,
    pub status: CycleStatus,
    /// Outcomes of tasks that finished before the deadline, in configuration order
    pub tasks: Vec<TaskOutcome>,
    /// Tasks that did not finish before the deadline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timed_out: Vec<TaskId>,
    pub cache: CacheStats,
}

impl CycleOutcome {
    /// Completed with every task successful.
    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Completed && self.tasks.iter().all(TaskOutcome::is_success)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|t| !t.is_success())
    }
}

// ----------------------------------------------------------------------------
// 9.2 Pipeline
// ----------------------------------------------------------------------------

/// Timing and parallelism of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub cycle_timeout: Duration,
    pub cancel_grace: Duration,
    /// Maximum number of tasks executing at once
    pub concurrency: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &GeneralConfig) -> Self {
        Self {
            cycle_timeout: config.cycle_timeout(),
            cancel_grace: config.cancel_grace(),
            concurrency: config.effective_concurrency(),
        }
    }
}

/// Runs cycles over a fixed set of composed tasks.
#[derive(Debug)]
pub struct Pipeline {
    tasks: Vec<Arc<ComposedTask>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(tasks: Vec<ComposedTask>, settings: PipelineSettings) -> Self {
        Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|t| t.id())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execute every task once. Never fails: all errors land in the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle_id = Uuid::new_v4();
        let start = Instant::now();
        let deadline = start + self.settings.cycle_timeout;
        let timer = PerfTimer::with_threshold(
            "cycle",
            self.settings.cycle_timeout.mul_f64(SLOW_CYCLE_FRACTION),
        );
        let ctx = CycleContext::new(Timestamp::now());
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        debug!(
            target: "metrics_etl::pipeline",
            cycle_id = %cycle_id,
            tasks = self.tasks.len(),
            concurrency = self.settings.concurrency,
            "Cycle started"
        );

        let mut set = JoinSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            let task = Arc::clone(task);
            let ctx = ctx.clone();
            let permits = Arc::clone(&permits);
            set.spawn(async move { (index, run_task(task, ctx, permits).await) });
        }

        let mut finished: Vec<Option<TaskOutcome>> = vec![None; self.tasks.len()];
        let mut status = CycleStatus::Completed;
        loop {
            match timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => finished[index] = Some(outcome),
                Ok(Some(Err(e))) => {
                    error!(target: "metrics_etl::pipeline", cycle_id = %cycle_id, error = %e, "Task join failed");
                }
                Ok(None) => break,
                Err(_) => {
                    status = CycleStatus::TimedOut;
                    break;
                }
            }
        }

        if status == CycleStatus::TimedOut {
            ctx.cancel.cancel();
            let running = set.len();
            let grace_deadline = Instant::now() + self.settings.cancel_grace;
            // Late outcomes are discarded; draining only lets tasks unwind.
            while let Ok(Some(_)) = timeout_at(grace_deadline, set.join_next()).await {}
            let abandoned = set.len();
            set.abort_all();

            warn!(
                target: "metrics_etl::pipeline",
                cycle_id = %cycle_id,
                running,
                abandoned,
                timeout_ms = self.settings.cycle_timeout.as_millis() as u64,
                "Cycle deadline reached, tasks cancelled"
            );
        }
        drop(set);

        let mut tasks = Vec::with_capacity(self.tasks.len());
        let mut timed_out = Vec::new();
        for (task, outcome) in self.tasks.iter().zip(finished) {
            match outcome {
                Some(outcome) => tasks.push(outcome),
                None if status == CycleStatus::TimedOut => timed_out.push(task.id().clone()),
                None => {
                    let mut outcome = TaskOutcome::new(task.id().clone());
                    outcome.panic = Some("task aborted".into());
                    tasks.push(outcome);
                }
            }
        }

        timer.stop();
        CycleOutcome {
            cycle_id,
            started_at: ctx.started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            status,
            tasks,
            timed_out,
            cache: ctx.cache.stats(),
        }
    }
}

/// Execute one task on a worker slot, turning a panic into a recorded failure.
async fn run_task(task: Arc<ComposedTask>, ctx: CycleContext, permits: Arc<Semaphore>) -> TaskOutcome {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    };
    if permit.is_none() {
        return TaskOutcome::new(task.id().clone());
    }

    match AssertUnwindSafe(task.execute(&ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(target: "metrics_etl::pipeline", task = %task.id(), panic = %message, "Task panicked");
            let mut outcome = TaskOutcome::new(task.id().clone());
            outcome.panic = Some(message);
            outcome
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
