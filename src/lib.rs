//! # metrics-etl - Scheduled Metrics Pipelines
//!
//! Periodically extracts time series from monitoring backends, runs each
//! series through a chain of transforms (last value, thresholds, anomaly
//! scores) and loads the results into destination systems.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           METRICS ETL ENGINE                          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  SCHEDULER → PIPELINE → (CACHE → SOURCES) → TRANSFORMS → DESTINATIONS │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every tick the scheduler starts one cycle. A cycle owns a fresh result
//! cache, runs all tasks on a bounded pool and reports a [`CycleOutcome`].
//! A series referenced by several tasks is extracted once per cycle.
//!
//! ## Author
//!
//! AIOps Team

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod task;
pub mod transform;
pub mod types;

pub use cache::{CacheStats, ResultCache};
pub use config::EtlConfig;
pub use connector::{ConnectorRegistry, Destination, Source};
pub use engine::Engine;
pub use error::{EtlError, EtlResult, ExtractError, LoadError, RegistryError, TransformError};
pub use pipeline::{CycleOutcome, CycleStatus, Pipeline};
pub use scheduler::{HealthReport, OutcomeReporter, Scheduler};
pub use task::{Task, TaskId, TaskOutcome};
pub use transform::{Transform, TransformChain, TransformRegistry, TransformRegistryBuilder};
pub use types::{DataPoint, MetricResponse, MetricValue, SeriesId, TimeRange, Timestamp};

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "metrics-etl";
pub const ENGINE_FULL_NAME: &str = "Metrics ETL Engine";

// ----------------------------------------------------------------------------
// Timing & Intervals
// ----------------------------------------------------------------------------

/// Default period between cycle starts (milliseconds)
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Minimum allowed tick period (milliseconds)
pub const MIN_INTERVAL_MS: u64 = 100;

/// Default cycle deadline (milliseconds)
pub const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 30_000;

/// Time cancelled tasks get to wind down after the deadline (milliseconds)
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2_000;

/// Default timeout for HTTP requests (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default extraction window (seconds)
pub const DEFAULT_LOOKBACK_SECS: u64 = 300;

/// Grace period for shutdown (seconds)
pub const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 30;

/// Fraction of the deadline after which a cycle is logged as slow
pub const SLOW_CYCLE_FRACTION: f64 = 0.8;

// ----------------------------------------------------------------------------
// Worker Pool & Health
// ----------------------------------------------------------------------------

/// Default task concurrency (0 = auto-detect based on CPU cores)
pub const DEFAULT_CONCURRENCY: usize = 0;

/// Maximum task concurrency
pub const MAX_CONCURRENCY: usize = 256;

/// Number of recent cycles that decide health
pub const DEFAULT_HEALTH_WINDOW: usize = 5;

// ----------------------------------------------------------------------------
// Anomaly Detection
// ----------------------------------------------------------------------------

/// Default |z| above which a z-score alert fires
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.0;

/// Default number of points needed before z-scores are computed
pub const DEFAULT_ZSCORE_MIN_SAMPLES: usize = 5;
