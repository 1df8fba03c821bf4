// ----------------------------------------------------------------------------
// 7.5 Log Destination
// ----------------------------------------------------------------------------

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Ack, Destination};
use crate::config::LogDestinationConfig;
use crate::error::{LoadError, LoadResult};
use crate::task::DestinationRef;
use crate::types::{MetricResponse, MetricValue};

/// Writes every response as a structured `tracing` event.
#[derive(Debug, Clone)]
pub struct LogDestination {
    name: String,
    firing_only: bool,
}

impl LogDestination {
    pub fn new(name: &str, config: &LogDestinationConfig) -> Self {
        Self {
            name: name.to_string(),
            firing_only: config.firing_only,
        }
    }
}

#[async_trait]
impl Destination for LogDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        destination: &DestinationRef,
        response: &MetricResponse,
        cancel: &CancellationToken,
    ) -> LoadResult<Ack> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled {
                destination: destination.to_string(),
            });
        }

        match response.value() {
            MetricValue::Alert(alert) if alert.is_firing() => {
                warn!(
                    target: "metrics_etl::connector::log",
                    destination = %destination,
                    series = %response.series(),
                    severity = %alert.severity,
                    observed = alert.observed,
                    threshold = alert.threshold,
                    timestamp = %response.timestamp(),
                    "Alert firing: {}",
                    alert.message
                );
            }
            _ if self.firing_only => {
                return Ok(Ack::new(destination.clone()).with_detail("skipped"));
            }
            MetricValue::Alert(alert) => {
                info!(
                    target: "metrics_etl::connector::log",
                    destination = %destination,
                    series = %response.series(),
                    severity = %alert.severity,
                    observed = alert.observed,
                    timestamp = %response.timestamp(),
                    "Alert ok"
                );
            }
            MetricValue::Scalar(value) => {
                info!(
                    target: "metrics_etl::connector::log",
                    destination = %destination,
                    series = %response.series(),
                    source = response.source(),
                    value = *value,
                    timestamp = %response.timestamp(),
                    "Metric"
                );
            }
            MetricValue::Points(points) => {
                info!(
                    target: "metrics_etl::connector::log",
                    destination = %destination,
                    series = %response.series(),
                    source = response.source(),
                    points = points.len(),
                    last = ?response.representative(),
                    timestamp = %response.timestamp(),
                    "Series"
                );
            }
        }

        Ok(Ack::new(destination.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertState, AlertValue, Severity, Timestamp};

    fn scalar() -> MetricResponse {
        MetricResponse::new("cpu.load".into(), MetricValue::Scalar(0.9), "graphite", Timestamp::EPOCH)
    }

    #[tokio::test]
    async fn test_acknowledges_loads() {
        let dest = LogDestination::new("console", &LogDestinationConfig::default());
        let ack = dest
            .load(&"console".into(), &scalar(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ack, Ack::new("console".into()));
    }

    #[tokio::test]
    async fn test_firing_only_skips_other_values() {
        let dest = LogDestination::new("console", &LogDestinationConfig { firing_only: true });
        let cancel = CancellationToken::new();

        let ack = dest.load(&"console".into(), &scalar(), &cancel).await.unwrap();
        assert_eq!(ack.detail.as_deref(), Some("skipped"));

        let firing = scalar().derive(
            MetricValue::Alert(AlertValue {
                state: AlertState::Firing,
                severity: Severity::High,
                observed: 0.9,
                threshold: 0.8,
                message: "0.9 above 0.8".into(),
            }),
            Timestamp::EPOCH,
        );
        let ack = dest.load(&"console".into(), &firing, &cancel).await.unwrap();
        assert_eq!(ack.detail, None);
    }

    #[tokio::test]
    async fn test_cancelled_load() {
        let dest = LogDestination::new("console", &LogDestinationConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dest.load(&"console".into(), &scalar(), &cancel).await.unwrap_err();
        assert!(matches!(err, LoadError::Cancelled { .. }));
    }
}
