// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The value objects flowing through the pipeline. All of them are immutable
// once constructed: a transform builds a new `MetricResponse`, it never edits
// the one it was given.
// ============================================================================

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// 2.1 Timestamp - Nanosecond Precision Time Handling
// ----------------------------------------------------------------------------

/// High-precision timestamp in nanoseconds since Unix epoch.
/// Using i64 allows representing times from ~1677 to ~2262.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from seconds since Unix epoch.
    /// Saturates outside the representable range.
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// `None` when `secs` lies outside ~1677..~2262.
    #[inline]
    pub const fn checked_from_secs(secs: i64) -> Option<Self> {
        match secs.checked_mul(1_000_000_000) {
            Some(nanos) => Some(Self(nanos)),
            None => None,
        }
    }

    /// Get the current timestamp with nanosecond precision
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Seconds as a float, for rate computations
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Calculate duration between two timestamps
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Add duration to timestamp
    #[inline]
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos() as i64))
    }

    /// Subtract duration from timestamp
    #[inline]
    pub fn sub_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_nanos() as i64))
    }

    /// Convert to chrono DateTime<Utc>
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }

    /// Zero timestamp (Unix epoch)
    pub const EPOCH: Timestamp = Timestamp(0);
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Half-open extraction window `[from, until)` handed to sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Timestamp,
    pub until: Timestamp,
}

impl TimeRange {
    pub fn new(from: Timestamp, until: Timestamp) -> Self {
        Self { from, until }
    }

    /// Window of `lookback` ending at `until`.
    pub fn lookback(until: Timestamp, lookback: Duration) -> Self {
        Self {
            from: until.sub_duration(lookback),
            until,
        }
    }

    #[inline]
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.from && ts < self.until
    }
}

// ----------------------------------------------------------------------------
// 2.2 Series Identity
// ----------------------------------------------------------------------------

/// Opaque name of a time series within a source (e.g. `"cpu.load"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(CompactString);

impl SeriesId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SeriesId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeriesId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SeriesId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Key used by the per-cycle cache. Exactly the series identifier.
pub type CacheKey = SeriesId;

// ----------------------------------------------------------------------------
// 2.3 Data Points & Values
// ----------------------------------------------------------------------------

/// A single (timestamp, value) sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl DataPoint {
    #[inline]
    pub const fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Severity level for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Informational - no action needed
    Info = 0,
    /// Low severity - can be addressed later
    Low = 1,
    /// Medium severity - should be addressed soon
    Medium = 2,
    /// High severity - needs attention
    High = 3,
    /// Critical severity - immediate action required
    Critical = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an alert condition currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Ok,
    Firing,
}

/// Result of an alerting transform for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertValue {
    pub state: AlertState,
    pub severity: Severity,
    /// Value the condition was evaluated against
    pub observed: f64,
    /// Bound or score limit that was compared
    pub threshold: f64,
    pub message: String,
}

impl AlertValue {
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }
}

/// Payload carried by a `MetricResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MetricValue {
    /// Ordered samples, oldest first
    Points(Vec<DataPoint>),
    /// A single representative value
    Scalar(f64),
    /// Outcome of an alerting rule
    Alert(AlertValue),
}

impl MetricValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricValue::Points(_) => "points",
            MetricValue::Scalar(_) => "scalar",
            MetricValue::Alert(_) => "alert",
        }
    }

    pub fn as_alert(&self) -> Option<&AlertValue> {
        match self {
            MetricValue::Alert(a) => Some(a),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// 2.4 Metric Response - THE unit flowing between stages
// ----------------------------------------------------------------------------

/// The extracted or derived value of one series at one pipeline stage.
///
/// Fields are private; a response is built once and then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResponse {
    series: SeriesId,
    value: MetricValue,
    source: CompactString,
    timestamp: Timestamp,
}

impl MetricResponse {
    pub fn new(
        series: SeriesId,
        value: MetricValue,
        source: impl Into<CompactString>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            series,
            value,
            source: source.into(),
            timestamp,
        }
    }

    /// Response for freshly extracted points. Timestamped at the newest point,
    /// or at `fallback` when the series is empty.
    pub fn extracted(
        series: SeriesId,
        source: impl Into<CompactString>,
        points: Vec<DataPoint>,
        fallback: Timestamp,
    ) -> Self {
        let timestamp = points.last().map(|p| p.timestamp).unwrap_or(fallback);
        Self::new(series, MetricValue::Points(points), source, timestamp)
    }

    /// A new response for the same series and source carrying `value`.
    pub fn derive(&self, value: MetricValue, timestamp: Timestamp) -> Self {
        Self {
            series: self.series.clone(),
            value,
            source: self.source.clone(),
            timestamp,
        }
    }

    /// A new response under a different series name (combining transforms).
    pub fn derive_as(&self, series: SeriesId, value: MetricValue, timestamp: Timestamp) -> Self {
        Self {
            series,
            value,
            source: self.source.clone(),
            timestamp,
        }
    }

    #[inline]
    pub fn series(&self) -> &SeriesId {
        &self.series
    }

    /// Dedup key. Two responses with the same series identifier are
    /// interchangeable within a cycle.
    #[inline]
    pub fn cache_key(&self) -> &CacheKey {
        &self.series
    }

    #[inline]
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    #[inline]
    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The value viewed as samples. A scalar or alert is a single sample at
    /// the response timestamp.
    pub fn points(&self) -> Cow<'_, [DataPoint]> {
        match &self.value {
            MetricValue::Points(points) => Cow::Borrowed(points.as_slice()),
            MetricValue::Scalar(v) => Cow::Owned(vec![DataPoint::new(self.timestamp, *v)]),
            MetricValue::Alert(a) => Cow::Owned(vec![DataPoint::new(self.timestamp, a.observed)]),
        }
    }

    /// Single value standing for the whole response: the scalar, the newest
    /// point, or the observed value of an alert.
    pub fn representative(&self) -> Option<f64> {
        match &self.value {
            MetricValue::Points(points) => points.last().map(|p| p.value),
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::Alert(a) => Some(a.observed),
        }
    }
}
