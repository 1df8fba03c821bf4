// ----------------------------------------------------------------------------
// 7.4 Static Source
// ----------------------------------------------------------------------------

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Source;
use crate::config::StaticSourceConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::types::{DataPoint, SeriesId, TimeRange, Timestamp};

/// Serves fixed points from configuration, ignoring the time range.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    series: HashMap<SeriesId, Vec<DataPoint>>,
    lookback: Duration,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            series: HashMap::new(),
            lookback: Duration::from_secs(crate::DEFAULT_LOOKBACK_SECS),
        }
    }

    pub fn from_config(name: &str, config: &StaticSourceConfig) -> Self {
        let mut source = Self::new(name);
        source.lookback = Duration::from_secs(config.lookback_secs);
        for (series, points) in &config.series {
            source = source.with_series(series.as_str(), points);
        }
        source
    }

    /// Add a series from `(epoch_secs, value)` pairs. Out-of-range seconds
    /// saturate; `EtlConfig::validate` rejects them for configured sources.
    pub fn with_series(mut self, series: &str, points: &[(i64, f64)]) -> Self {
        let mut points: Vec<DataPoint> = points
            .iter()
            .map(|(t, v)| DataPoint::new(Timestamp::from_secs(*t), *v))
            .collect();
        points.sort_by_key(|p| p.timestamp);
        self.series.insert(SeriesId::from(series), points);
        self
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> Duration {
        self.lookback
    }

    async fn extract(
        &self,
        series: &SeriesId,
        _range: TimeRange,
        cancel: &CancellationToken,
    ) -> ExtractResult<Vec<DataPoint>> {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled {
                series: series.clone(),
            });
        }
        let points = self
            .series
            .get(series)
            .cloned()
            .ok_or_else(|| ExtractError::not_found(&self.name, series.clone()))?;
        trace!(target: "metrics_etl::connector::static", source = %self.name, series = %series, points = points.len(), "Series served");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_serves_configured_series() {
        let mut series = BTreeMap::new();
        series.insert("cpu.load".to_string(), vec![(3, 0.9), (1, 0.2)]);
        let source = StaticSource::from_config(
            "demo",
            &StaticSourceConfig {
                series,
                lookback_secs: 60,
            },
        );
        let range = TimeRange::lookback(Timestamp::from_secs(100), source.lookback());
        let cancel = CancellationToken::new();

        let points = source.extract(&"cpu.load".into(), range, &cancel).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, Timestamp::from_secs(1));
        assert_eq!(source.lookback(), Duration::from_secs(60));

        let err = source.extract(&"mem.used".into(), range, &cancel).await.unwrap_err();
        assert!(matches!(err, ExtractError::SeriesNotFound { .. }));

        cancel.cancel();
        let err = source.extract(&"cpu.load".into(), range, &cancel).await.unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled { .. }));
    }

    #[test]
    fn test_out_of_range_points_saturate() {
        let source = StaticSource::new("demo").with_series("x", &[(1_700_000_000_000, 1.0), (5, 2.0)]);
        let points = &source.series[&SeriesId::from("x")];
        assert_eq!(points[0].timestamp, Timestamp::from_secs(5));
        assert_eq!(points[1].timestamp.as_nanos(), i64::MAX);
    }
}
