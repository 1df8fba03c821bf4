//! Connector doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{Ack, Destination, Source};
use crate::error::{ExtractError, ExtractResult, LoadError, LoadResult};
use crate::task::DestinationRef;
use crate::types::{DataPoint, MetricResponse, SeriesId, TimeRange, Timestamp};

#[derive(Debug, Clone)]
enum Script {
    Points(Vec<DataPoint>),
    Fail(ExtractError),
    /// Never returns on its own, but honours cancellation
    Hang,
    /// Never returns and ignores cancellation
    Stuck,
}

/// Source answering from a per-series script, counting every call.
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    scripts: HashMap<SeriesId, Script>,
    delay: Duration,
    calls: Mutex<HashMap<SeriesId, usize>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_points(mut self, series: &str, points: &[(i64, f64)]) -> Self {
        let points = points
            .iter()
            .map(|(t, v)| DataPoint::new(Timestamp::from_secs(*t), *v))
            .collect();
        self.scripts.insert(series.into(), Script::Points(points));
        self
    }

    pub fn with_error(mut self, series: &str, error: ExtractError) -> Self {
        self.scripts.insert(series.into(), Script::Fail(error));
        self
    }

    pub fn hanging(mut self, series: &str) -> Self {
        self.scripts.insert(series.into(), Script::Hang);
        self
    }

    pub fn stuck(mut self, series: &str) -> Self {
        self.scripts.insert(series.into(), Script::Stuck);
        self
    }

    /// Simulated latency of every successful or failed call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, series: &str) -> usize {
        self.calls
            .lock()
            .get(&SeriesId::from(series))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        series: &SeriesId,
        _range: TimeRange,
        cancel: &CancellationToken,
    ) -> ExtractResult<Vec<DataPoint>> {
        *self.calls.lock().entry(series.clone()).or_insert(0) += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        let script = self
            .scripts
            .get(series)
            .cloned()
            .unwrap_or_else(|| Script::Fail(ExtractError::not_found(&self.name, series.clone())));

        match script {
            Script::Stuck => std::future::pending::<ExtractResult<Vec<DataPoint>>>().await,
            Script::Hang => {
                cancel.cancelled().await;
                Err(ExtractError::Cancelled {
                    series: series.clone(),
                })
            }
            Script::Points(points) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ExtractError::Cancelled { series: series.clone() }),
                    _ = tokio::time::sleep(self.delay) => Ok(points),
                }
            }
            Script::Fail(error) => {
                tokio::time::sleep(self.delay).await;
                Err(error)
            }
        }
    }
}

/// Destination recording every load, optionally failing all of them.
#[derive(Debug)]
pub struct RecordingDestination {
    name: String,
    failure: Option<LoadError>,
    loads: Mutex<Vec<(DestinationRef, MetricResponse)>>,
}

impl RecordingDestination {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: None,
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str, error: LoadError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(name)
        }
    }

    pub fn loads(&self) -> Vec<(DestinationRef, MetricResponse)> {
        self.loads.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        destination: &DestinationRef,
        response: &MetricResponse,
        _cancel: &CancellationToken,
    ) -> LoadResult<Ack> {
        self.loads.lock().push((destination.clone(), response.clone()));
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(Ack::new(destination.clone())),
        }
    }
}

/// Serve one raw HTTP response on a local port. Returns the base URL.
pub async fn serve_once(status: u16, body: &str) -> String {
    capture_once(status, body).await.0
}

/// Like `serve_once`, also handing back the raw request it received.
pub async fn capture_once(status: u16, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            // Headers, then whatever body the client announced.
            loop {
                let n = stream.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = find_header_end(&request) {
                    let expected = content_length(&request[..end]);
                    if request.len() >= end + 4 + expected {
                        break;
                    }
                }
            }
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        }
    });

    (format!("http://{}", addr), rx)
}

/// A local URL nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &[u8]) -> usize {
    String::from_utf8_lossy(headers)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}
