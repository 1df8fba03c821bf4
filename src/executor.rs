// ============================================================================
// TASK EXECUTION
// ============================================================================
// A task composed against the connector and transform registries, and the
// per-cycle execution of it: resolve inputs through the cycle cache, run the
// chain, load into every destination. Failures are recorded, never raised.
// ============================================================================

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::{ExtractOutcome, ResultCache};
use crate::connector::{ConnectorRegistry, Destination, Source};
use crate::error::{ConfigError, EtlResult, ExtractError};
use crate::task::{DestinationRef, LoadFailure, SeriesFailure, SeriesRef, Task, TaskId, TaskOutcome};
use crate::transform::{TransformChain, TransformRegistry};
use crate::types::{MetricResponse, SeriesId, TimeRange, Timestamp};

// ----------------------------------------------------------------------------
// 8.1 Cycle Context
// ----------------------------------------------------------------------------

/// State shared by every task of one cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cache: Arc<ResultCache>,
    pub cancel: CancellationToken,
    /// Wall-clock start of the cycle; extraction ranges end here
    pub started_at: Timestamp,
}

impl CycleContext {
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            cache: Arc::new(ResultCache::new()),
            cancel: CancellationToken::new(),
            started_at,
        }
    }
}

// ----------------------------------------------------------------------------
// 8.2 Composed Task
// ----------------------------------------------------------------------------

/// A task with every reference resolved. Built once at startup.
pub struct ComposedTask {
    task: Task,
    inputs: Vec<(SeriesRef, Arc<dyn Source>)>,
    chain: TransformChain,
    destinations: Vec<(DestinationRef, Arc<dyn Destination>)>,
}

impl ComposedTask {
    /// Resolve the connectors and transforms `task` names.
    ///
    /// Unknown transforms surface as `RegistryError::UnknownTransform`,
    /// unknown connectors as `ConfigError::UnknownReference`.
    pub fn compose(
        task: Task,
        connectors: &ConnectorRegistry,
        transforms: &TransformRegistry,
    ) -> EtlResult<Self> {
        let inputs = task
            .inputs()
            .iter()
            .map(|input| {
                connectors
                    .source(&input.source)
                    .map(|source| (input.clone(), source))
                    .ok_or_else(|| {
                        ConfigError::unknown_reference("source", input.source.as_str(), task.id().as_str())
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let destinations = task
            .destinations()
            .iter()
            .map(|dest| {
                connectors
                    .destination(dest.as_str())
                    .map(|d| (dest.clone(), d))
                    .ok_or_else(|| {
                        ConfigError::unknown_reference("destination", dest.as_str(), task.id().as_str())
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let chain = TransformChain::resolve(task.chain(), transforms)?;

        Ok(Self {
            task,
            inputs,
            chain,
            destinations,
        })
    }

    pub fn id(&self) -> &TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    /// Run extract, transform and load in order.
    pub async fn execute(&self, ctx: &CycleContext) -> TaskOutcome {
        let start = Instant::now();
        let mut outcome = TaskOutcome::new(self.id().clone());

        let resolved = join_all(self.inputs.iter().map(|(input, source)| self.resolve(ctx, input, source))).await;

        let mut responses = Vec::with_capacity(resolved.len());
        for (result, (input, _)) in resolved.into_iter().zip(&self.inputs) {
            match result {
                Ok(response) => responses.push(MetricResponse::clone(&response)),
                Err(error) => outcome.extraction_errors.push(SeriesFailure {
                    source: input.source.clone(),
                    series: input.series.clone(),
                    error,
                }),
            }
        }

        if !outcome.extraction_errors.is_empty() {
            debug!(
                target: "metrics_etl::executor",
                task = %self.id(),
                failed = outcome.extraction_errors.len(),
                "Extraction failed, skipping transform and load"
            );
            outcome.elapsed_ms = start.elapsed().as_millis() as u64;
            return outcome;
        }

        let output = match self.chain.apply(responses) {
            Ok(output) => output,
            Err(failure) => {
                debug!(target: "metrics_etl::executor", task = %self.id(), failure = %failure, "Transform failed");
                outcome.transform_error = Some(failure);
                outcome.elapsed_ms = start.elapsed().as_millis() as u64;
                return outcome;
            }
        };

        // Destinations load concurrently, each one response at a time.
        let loads = join_all(
            self.destinations
                .iter()
                .map(|(dest_ref, dest)| load_all(dest_ref, dest.as_ref(), &output, &ctx.cancel)),
        )
        .await;
        for (loaded, failures) in loads {
            outcome.loaded += loaded;
            outcome.load_errors.extend(failures);
        }

        outcome.elapsed_ms = start.elapsed().as_millis() as u64;
        trace!(
            target: "metrics_etl::executor",
            task = %self.id(),
            loaded = outcome.loaded,
            elapsed_ms = outcome.elapsed_ms,
            "Task executed"
        );
        outcome
    }

    async fn resolve(
        &self,
        ctx: &CycleContext,
        input: &SeriesRef,
        source: &Arc<dyn Source>,
    ) -> Result<Arc<MetricResponse>, ExtractError> {
        let source = Arc::clone(source);
        let series = input.series.clone();
        let cancel = ctx.cancel.clone();
        let started_at = ctx.started_at;

        ctx.cache
            .get_or_extract(&input.series, move || extract_series(source, series, cancel, started_at))
            .await
    }
}

/// Cache miss path: one connector call covering the source's lookback window.
async fn extract_series(
    source: Arc<dyn Source>,
    series: SeriesId,
    cancel: CancellationToken,
    started_at: Timestamp,
) -> ExtractOutcome {
    let range = TimeRange::lookback(started_at, source.lookback());
    let points = source.extract(&series, range, &cancel).await?;
    Ok(Arc::new(MetricResponse::extracted(
        series,
        source.name(),
        points,
        range.until,
    )))
}

async fn load_all(
    dest_ref: &DestinationRef,
    destination: &dyn Destination,
    responses: &[MetricResponse],
    cancel: &CancellationToken,
) -> (usize, Vec<LoadFailure>) {
    let mut loaded = 0;
    let mut failures = Vec::new();
    for response in responses {
        match destination.load(dest_ref, response, cancel).await {
            Ok(_) => loaded += 1,
            Err(error) => failures.push(LoadFailure {
                destination: dest_ref.clone(),
                series: response.series().clone(),
                error,
            }),
        }
    }
    (loaded, failures)
}

impl std::fmt::Debug for ComposedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedTask")
            .field("id", self.id())
            .field("inputs", &self.task.inputs())
            .field("chain", &self.chain)
            .field("destinations", &self.task.destinations())
            .finish()
    }
}
