// ============================================================================
// CONNECTORS
// ============================================================================
// Sources extract points for a named series, destinations load a response.
// The engine only ever calls these two operations and decides retry
// eligibility from the returned error kind.
// ============================================================================

mod graphite;
mod log;
mod static_source;
mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use graphite::GraphiteSource;
pub use log::LogDestination;
pub use static_source::StaticSource;
pub use webhook::WebhookDestination;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{DestinationConfig, EtlConfig, SourceConfig};
use crate::error::{ConfigError, ExtractResult, LoadResult};
use crate::task::DestinationRef;
use crate::types::{DataPoint, MetricResponse, SeriesId, TimeRange};

// ----------------------------------------------------------------------------
// 7.1 Connector Traits
// ----------------------------------------------------------------------------

/// Extract capability of a monitoring backend.
#[async_trait]
pub trait Source: Send + Sync {
    /// Configured name of this source.
    fn name(&self) -> &str;

    /// Window ending at the cycle start that extraction covers.
    fn lookback(&self) -> Duration {
        Duration::from_secs(crate::DEFAULT_LOOKBACK_SECS)
    }

    /// Fetch the points of `series` within `range`, oldest first.
    ///
    /// Implementations should return `ExtractError::Cancelled` promptly once
    /// `cancel` fires.
    async fn extract(
        &self,
        series: &SeriesId,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> ExtractResult<Vec<DataPoint>>;
}

/// Load capability of a destination system.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    /// Push one response. Should honour `cancel` like [`Source::extract`].
    async fn load(
        &self,
        destination: &DestinationRef,
        response: &MetricResponse,
        cancel: &CancellationToken,
    ) -> LoadResult<Ack>;
}

/// Acknowledgement of a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub destination: DestinationRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Ack {
    pub fn new(destination: DestinationRef) -> Self {
        Self {
            destination,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ----------------------------------------------------------------------------
// 7.2 Connector Registry
// ----------------------------------------------------------------------------

/// Named sources and destinations, built once at startup.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
    destinations: HashMap<String, Arc<dyn Destination>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every connector declared in `config`.
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for (name, source) in &config.sources {
            let source: Arc<dyn Source> = match source {
                SourceConfig::Graphite(c) => Arc::new(GraphiteSource::new(name, c)),
                SourceConfig::Static(c) => Arc::new(StaticSource::from_config(name, c)),
            };
            registry.register_source(source)?;
        }

        for (name, destination) in &config.destinations {
            let destination: Arc<dyn Destination> = match destination {
                DestinationConfig::Log(c) => Arc::new(LogDestination::new(name, c)),
                DestinationConfig::Webhook(c) => Arc::new(WebhookDestination::new(name, c)?),
            };
            registry.register_destination(destination)?;
        }

        Ok(registry)
    }

    /// Register a source under its own name. Names must be unique.
    pub fn register_source(&mut self, source: Arc<dyn Source>) -> Result<(), ConfigError> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(ConfigError::invalid_value(
                format!("sources.{}", name),
                "source name already registered",
            ));
        }
        debug!(target: "metrics_etl::connector", source = %name, "Source registered");
        self.sources.insert(name, source);
        Ok(())
    }

    /// Register a destination under its own name. Names must be unique.
    pub fn register_destination(
        &mut self,
        destination: Arc<dyn Destination>,
    ) -> Result<(), ConfigError> {
        let name = destination.name().to_string();
        if self.destinations.contains_key(&name) {
            return Err(ConfigError::invalid_value(
                format!("destinations.{}", name),
                "destination name already registered",
            ));
        }
        debug!(target: "metrics_etl::connector", destination = %name, "Destination registered");
        self.destinations.insert(name, destination);
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).cloned()
    }

    pub fn destination(&self, name: &str) -> Option<Arc<dyn Destination>> {
        self.destinations.get(name).cloned()
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn destination_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.destinations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_names())
            .field("destinations", &self.destination_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::{RecordingDestination, ScriptedSource};

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register_source(Arc::new(ScriptedSource::new("graphite")))
            .unwrap();
        let err = registry
            .register_source(Arc::new(ScriptedSource::new("graphite")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        registry
            .register_destination(Arc::new(RecordingDestination::new("ops")))
            .unwrap();
        assert!(registry
            .register_destination(Arc::new(RecordingDestination::new("ops")))
            .is_err());
    }

    #[test]
    fn test_from_config() {
        let config = EtlConfig::example();
        let registry = ConnectorRegistry::from_config(&config).unwrap();

        assert_eq!(registry.source_names(), vec!["demo", "graphite"]);
        assert_eq!(registry.destination_names(), vec!["console"]);
        assert!(registry.source("demo").is_some());
        assert!(registry.destination("missing").is_none());
    }
}
