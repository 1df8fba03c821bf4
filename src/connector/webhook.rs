// ----------------------------------------------------------------------------
// 7.6 Webhook Destination
// ----------------------------------------------------------------------------
// POSTs each response as JSON. 4xx answers are permanent rejections; 5xx,
// connect errors and timeouts are transient.
// ----------------------------------------------------------------------------

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Ack, Destination};
use crate::config::WebhookDestinationConfig;
use crate::error::{ConfigError, LoadError, LoadResult};
use crate::task::DestinationRef;
use crate::types::MetricResponse;

/// Destination posting JSON to an HTTP endpoint.
#[derive(Debug)]
pub struct WebhookDestination {
    name: String,
    url: String,
    client: HttpClient,
}

impl WebhookDestination {
    pub fn new(name: &str, config: &WebhookDestinationConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let field = format!("destinations.{}.headers.{}", name, key);
            let header = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConfigError::invalid_value(&field, e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::invalid_value(&field, e.to_string()))?;
            headers.insert(header, value);
        }

        let client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ConfigError::invalid_value(format!("destinations.{}", name), e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            url: config.url.clone(),
            client,
        })
    }

    async fn post(&self, destination: &DestinationRef, response: &MetricResponse) -> LoadResult<Ack> {
        let reply = self
            .client
            .post(&self.url)
            .json(response)
            .send()
            .await
            .map_err(|e| LoadError::unavailable(destination.as_str(), format!("HTTP request failed: {}", e)))?;

        let status = reply.status();
        if status.is_success() {
            Ok(Ack::new(destination.clone()).with_detail(status.as_str()))
        } else if status.is_client_error() {
            Err(LoadError::rejected(
                destination.as_str(),
                format!("endpoint answered {}", status),
            ))
        } else {
            Err(LoadError::unavailable(
                destination.as_str(),
                format!("endpoint answered {}", status),
            ))
        }
    }
}

#[async_trait]
impl Destination for WebhookDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        destination: &DestinationRef,
        response: &MetricResponse,
        cancel: &CancellationToken,
    ) -> LoadResult<Ack> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LoadError::Cancelled { destination: destination.to_string() }),
            result = self.post(destination, response) => result,
        };

        match &result {
            Ok(_) => debug!(
                target: "metrics_etl::connector::webhook",
                destination = %destination,
                series = %response.series(),
                "Response delivered"
            ),
            Err(e) => warn!(
                target: "metrics_etl::connector::webhook",
                destination = %destination,
                series = %response.series(),
                error = %e,
                "Delivery failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::{capture_once, refused_url, serve_once};
    use crate::types::{MetricValue, Timestamp};
    use std::collections::BTreeMap;

    fn webhook(url: &str) -> WebhookDestination {
        WebhookDestination::new(
            "ops",
            &WebhookDestinationConfig {
                url: url.to_string(),
                timeout_secs: 5,
                headers: BTreeMap::new(),
            },
        )
        .unwrap()
    }

    fn response() -> MetricResponse {
        MetricResponse::new("cpu.load".into(), MetricValue::Scalar(0.9), "graphite", Timestamp::EPOCH)
    }

    async fn load(url: &str) -> LoadResult<Ack> {
        webhook(url)
            .load(&"ops".into(), &response(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_status_classification() {
        let ack = load(&serve_once(202, "").await).await.unwrap();
        assert_eq!(ack.detail.as_deref(), Some("202"));

        let err = load(&serve_once(400, "").await).await.unwrap_err();
        assert!(matches!(err, LoadError::Rejected { .. }));
        assert!(!err.is_retryable());

        let err = load(&serve_once(502, "").await).await.unwrap_err();
        assert!(matches!(err, LoadError::DestinationUnavailable { .. }));

        let err = load(&refused_url().await).await.unwrap_err();
        assert!(matches!(err, LoadError::DestinationUnavailable { .. }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = WebhookDestination::new(
            "ops",
            &WebhookDestinationConfig {
                url: "http://localhost".into(),
                timeout_secs: 5,
                headers,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_configured_headers_sent() {
        let (url, request) = capture_once(200, "").await;
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());
        let webhook = WebhookDestination::new(
            "ops",
            &WebhookDestinationConfig {
                url,
                timeout_secs: 5,
                headers,
            },
        )
        .unwrap();

        webhook
            .load(&"ops".into(), &response(), &CancellationToken::new())
            .await
            .unwrap();

        let request = request.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post "), "{}", request);
        assert!(request.contains("authorization: bearer token"), "{}", request);
        assert!(request.contains("\"series\":\"cpu.load\""), "{}", request);
    }
}
