// ----------------------------------------------------------------------------
// 7.3 Graphite Source
// ----------------------------------------------------------------------------
// Reads series through the graphite-web render API:
//   GET {url}/render?target=<series>&from=<epoch>&until=<epoch>&format=json
// ----------------------------------------------------------------------------

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Source;
use crate::config::GraphiteSourceConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::types::{DataPoint, SeriesId, TimeRange, Timestamp};

/// One entry of a render API response.
#[derive(Debug, Clone, Deserialize)]
struct RenderSeries {
    target: String,
    /// `[value, epoch_secs]`, value `null` for gaps
    datapoints: Vec<(Option<f64>, i64)>,
}

/// Source backed by a graphite-web instance.
#[derive(Debug)]
pub struct GraphiteSource {
    name: String,
    base_url: String,
    client: HttpClient,
    lookback: Duration,
}

impl GraphiteSource {
    pub fn new(name: &str, config: &GraphiteSourceConfig) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            lookback: Duration::from_secs(config.lookback_secs),
        }
    }

    async fn fetch(&self, series: &SeriesId, range: TimeRange) -> ExtractResult<Vec<DataPoint>> {
        let url = format!("{}/render", self.base_url);
        let from = range.from.as_secs().to_string();
        let until = range.until.as_secs().to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("target", series.as_str()),
                ("from", from.as_str()),
                ("until", until.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| ExtractError::unavailable(&self.name, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExtractError::not_found(&self.name, series.clone()));
        }
        if !status.is_success() {
            return Err(ExtractError::unavailable(
                &self.name,
                format!("Graphite returned status {}", status),
            ));
        }

        let body: Vec<RenderSeries> = response
            .json()
            .await
            .map_err(|e| ExtractError::unavailable(&self.name, format!("Failed to parse JSON: {}", e)))?;

        parse_render(&self.name, series, body)
    }
}

/// Turn a render response into points, oldest first.
///
/// Gaps are dropped. With several matching targets the one named exactly
/// like the series wins, otherwise the first.
fn parse_render(
    source: &str,
    series: &SeriesId,
    body: Vec<RenderSeries>,
) -> ExtractResult<Vec<DataPoint>> {
    let exact = body.iter().position(|s| s.target == series.as_str());
    let chosen = match exact {
        Some(index) => body.into_iter().nth(index),
        None => body.into_iter().next(),
    };
    let chosen = chosen.ok_or_else(|| ExtractError::not_found(source, series.clone()))?;

    let mut points = Vec::with_capacity(chosen.datapoints.len());
    for (value, ts) in chosen.datapoints {
        let Some(value) = value else { continue };
        let timestamp = Timestamp::checked_from_secs(ts).ok_or_else(|| {
            ExtractError::unavailable(source, format!("Timestamp {} out of range for '{}'", ts, series))
        })?;
        points.push(DataPoint::new(timestamp, value));
    }
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

#[async_trait]
impl Source for GraphiteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> Duration {
        self.lookback
    }

    async fn extract(
        &self,
        series: &SeriesId,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> ExtractResult<Vec<DataPoint>> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled { series: series.clone() }),
            result = self.fetch(series, range) => result,
        };

        match &result {
            Ok(points) => debug!(
                target: "metrics_etl::connector::graphite",
                source = %self.name,
                series = %series,
                points = points.len(),
                "Series extracted"
            ),
            Err(e) => warn!(
                target: "metrics_etl::connector::graphite",
                source = %self.name,
                series = %series,
                error = %e,
                "Extraction failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::{refused_url, serve_once};
    use pretty_assertions::assert_eq;

    fn source(url: &str) -> GraphiteSource {
        GraphiteSource::new(
            "graphite",
            &GraphiteSourceConfig {
                url: url.to_string(),
                timeout_secs: 5,
                lookback_secs: 300,
            },
        )
    }

    fn range() -> TimeRange {
        TimeRange::lookback(Timestamp::from_secs(1_000), Duration::from_secs(300))
    }

    #[test]
    fn test_parse_render_drops_gaps() {
        let body: Vec<RenderSeries> = serde_json::from_str(
            r#"[{"target": "cpu.load", "datapoints": [[0.5, 20], [null, 30], [0.2, 10]]}]"#,
        )
        .unwrap();
        let points = parse_render("graphite", &"cpu.load".into(), body).unwrap();
        assert_eq!(
            points,
            vec![
                DataPoint::new(Timestamp::from_secs(10), 0.2),
                DataPoint::new(Timestamp::from_secs(20), 0.5),
            ]
        );
    }

    #[test]
    fn test_parse_render_prefers_exact_target() {
        let body: Vec<RenderSeries> = serde_json::from_str(
            r#"[{"target": "cpu.load.avg", "datapoints": [[1.0, 10]]},
                {"target": "cpu.load", "datapoints": [[2.0, 10]]}]"#,
        )
        .unwrap();
        let points = parse_render("graphite", &"cpu.load".into(), body).unwrap();
        assert_eq!(points[0].value, 2.0);
    }

    #[test]
    fn test_parse_render_rejects_out_of_range_timestamp() {
        let body: Vec<RenderSeries> = serde_json::from_str(
            r#"[{"target": "cpu.load", "datapoints": [[0.5, 1700000000000]]}]"#,
        )
        .unwrap();
        let err = parse_render("graphite", &"cpu.load".into(), body).unwrap_err();
        assert!(matches!(err, ExtractError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_parse_render_empty_is_not_found() {
        let err = parse_render("graphite", &"cpu.load".into(), vec![]).unwrap_err();
        assert!(matches!(err, ExtractError::SeriesNotFound { .. }));
    }

    #[tokio::test]
    async fn test_extract_success() {
        let url = serve_once(200, r#"[{"target": "cpu.load", "datapoints": [[0.9, 900]]}]"#).await;
        let points = source(&url)
            .extract(&"cpu.load".into(), range(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(points, vec![DataPoint::new(Timestamp::from_secs(900), 0.9)]);
    }

    #[tokio::test]
    async fn test_extract_error_classification() {
        let url = serve_once(404, "").await;
        let err = source(&url)
            .extract(&"cpu.load".into(), range(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::SeriesNotFound { .. }));

        let url = serve_once(503, "").await;
        let err = source(&url)
            .extract(&"cpu.load".into(), range(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::SourceUnavailable { .. }));

        let url = refused_url().await;
        let err = source(&url)
            .extract(&"cpu.load".into(), range(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_extract_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source("http://10.255.255.1:81")
            .extract(&"cpu.load".into(), range(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled { .. }));
    }
}
