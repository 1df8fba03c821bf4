// ============================================================================
// ENGINE
// ============================================================================
// Explicit composition from configuration: transform registry, connectors,
// composed tasks, pipeline, scheduler. Every reference is resolved here so
// that an unknown transform or connector stops startup before any cycle runs.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EtlConfig;
use crate::connector::ConnectorRegistry;
use crate::error::EtlResult;
use crate::executor::ComposedTask;
use crate::pipeline::{CycleOutcome, Pipeline, PipelineSettings};
use crate::scheduler::{
    HealthReport, HealthTracker, OutcomeReporter, Scheduler, SchedulerSettings, TracingReporter,
};
use crate::transform::{register_builtins, TransformId, TransformRegistry, TransformRegistryBuilder};
use crate::types::Timestamp;
use crate::{ENGINE_FULL_NAME, ENGINE_VERSION};

// ----------------------------------------------------------------------------
// 11.1 Composition
// ----------------------------------------------------------------------------

/// Built-in transforms plus every configured `[transforms.<id>]` instance.
///
/// A configured identifier colliding with a built-in one is a
/// `DuplicateIdentifier` error.
pub fn build_transform_registry(config: &EtlConfig) -> EtlResult<TransformRegistry> {
    let mut builder = TransformRegistryBuilder::new();
    register_builtins(&mut builder)?;
    for (id, spec) in &config.transforms {
        builder.register_spec(id.as_str(), spec)?;
    }
    Ok(builder.freeze())
}

// ----------------------------------------------------------------------------
// 11.2 Engine
// ----------------------------------------------------------------------------

/// A fully composed engine, ready to run cycles.
#[derive(Debug)]
pub struct Engine {
    config: EtlConfig,
    transforms: TransformRegistry,
    connectors: ConnectorRegistry,
    scheduler: Scheduler,
    start_time: Timestamp,
}

impl Engine {
    /// Compose an engine that reports through `tracing`.
    pub fn from_config(config: EtlConfig) -> EtlResult<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    /// Compose an engine with a custom outcome reporter.
    pub fn with_reporter(config: EtlConfig, reporter: Arc<dyn OutcomeReporter>) -> EtlResult<Self> {
        config.validate()?;

        let transforms = build_transform_registry(&config)?;
        let connectors = ConnectorRegistry::from_config(&config)?;
        let tasks = config
            .tasks
            .iter()
            .cloned()
            .map(|task| ComposedTask::compose(task, &connectors, &transforms))
            .collect::<EtlResult<Vec<_>>>()?;

        info!(
            target: "metrics_etl::engine",
            instance = %config.engine.instance_name,
            tasks = tasks.len(),
            sources = connectors.source_names().len(),
            destinations = connectors.destination_names().len(),
            transforms = transforms.len(),
            "Engine composed"
        );

        let pipeline = Arc::new(Pipeline::new(tasks, PipelineSettings::from_config(&config.engine)));
        let scheduler = Scheduler::new(
            pipeline,
            SchedulerSettings::from_config(&config.engine),
            reporter,
            Arc::new(HealthTracker::new(config.engine.health_window)),
        );

        Ok(Self {
            config,
            transforms,
            connectors,
            scheduler,
            start_time: Timestamp::now(),
        })
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Registered transform identifiers, sorted.
    pub fn transforms(&self) -> Vec<&TransformId> {
        self.transforms.ids()
    }

    pub fn health(&self) -> HealthReport {
        self.scheduler.health()
    }

    pub fn uptime(&self) -> Duration {
        Timestamp::now().duration_since(self.start_time)
    }

    /// Run exactly one cycle.
    pub async fn run_once(&self) -> CycleOutcome {
        self.scheduler.run_once().await
    }

    /// Run until SIGTERM or SIGINT, then drain the in-flight cycle.
    pub async fn run(&self) -> EtlResult<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!(target: "metrics_etl::engine", "Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!(target: "metrics_etl::engine", "Received SIGINT");
                }
            }
            trigger.cancel();
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` fires.
    pub async fn run_until(&self, shutdown: CancellationToken) -> EtlResult<()> {
        info!(
            target: "metrics_etl::engine",
            version = ENGINE_VERSION,
            instance = %self.config.engine.instance_name,
            interval_ms = self.config.engine.interval_ms,
            concurrency = self.config.engine.effective_concurrency(),
            "Starting {}",
            ENGINE_FULL_NAME
        );

        let result = self.scheduler.run(shutdown).await;

        let health = self.health();
        info!(
            target: "metrics_etl::engine",
            cycles = health.cycles_run,
            missed_ticks = health.missed_ticks,
            uptime_secs = self.uptime().as_secs(),
            "Engine shutdown complete"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EtlError, RegistryError};
    use crate::pipeline::CycleStatus;
    use crate::task::{DestinationRef, SeriesRef, Task};
    use crate::transform::TransformSpec;
    use crate::types::MetricValue;

    #[tokio::test]
    async fn test_example_config_runs_once() {
        let engine = Engine::from_config(EtlConfig::example()).unwrap();

        let outcome = engine.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Completed);
        assert!(outcome.is_success(), "{:?}", outcome);
        assert_eq!(outcome.tasks[0].loaded, 1);
        assert!(engine.health().ready);
    }

    #[test]
    fn test_unknown_transform_fails_startup() {
        let mut config = EtlConfig::example();
        config.tasks.push(
            Task::new(
                "broken",
                vec![SeriesRef::new("demo", "cpu.load")],
                vec![TransformId::from("does_not_exist")],
                vec![DestinationRef::from("console")],
            )
            .unwrap(),
        );

        let err = Engine::from_config(config).unwrap_err();
        assert!(matches!(
            err,
            EtlError::Registry(RegistryError::UnknownTransform(ref id)) if id == "does_not_exist"
        ));
    }

    #[test]
    fn test_configured_transform_cannot_shadow_builtin() {
        let mut config = EtlConfig::example();
        config
            .transforms
            .insert("lastdatapoint".into(), TransformSpec::Scale { factor: 2.0 });

        let err = Engine::from_config(config).unwrap_err();
        assert!(matches!(err, EtlError::Registry(RegistryError::DuplicateIdentifier(_))));
    }

    #[test]
    fn test_transforms_listed() {
        let engine = Engine::from_config(EtlConfig::example()).unwrap();
        let ids: Vec<&str> = engine.transforms().into_iter().map(TransformId::as_str).collect();
        assert!(ids.contains(&"lastdatapoint"));
        assert!(ids.contains(&"cpu_high"));
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stops_on_shutdown() {
        let engine = Engine::from_config(EtlConfig::example()).unwrap();
        let shutdown = CancellationToken::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });
        engine.run_until(shutdown).await.unwrap();

        let health = engine.health();
        assert!(health.ready);
        assert!(health.healthy);
        assert_eq!(health.cycles_run, 1);
    }

    #[test]
    fn test_threshold_fires_on_example() {
        // 0.9 from the demo series is above the 0.8 bound of cpu_high.
        let config = EtlConfig::example();
        let registry = build_transform_registry(&config).unwrap();
        let threshold = registry.lookup("cpu_high").unwrap();
        let input = crate::types::MetricResponse::new(
            "cpu.load".into(),
            MetricValue::Scalar(0.9),
            "demo",
            Timestamp::from_secs(1_700_000_120),
        );
        let output = threshold.apply(&[input]).unwrap();
        assert!(output[0].value().as_alert().map_or(false, |a| a.is_firing()));
    }
}
