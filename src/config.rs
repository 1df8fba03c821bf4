// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// TOML configuration with environment overrides:
// - Figment merges the file with METRICS_ETL_* variables
// - Every section has sensible defaults
// - Cross-references (tasks → sources, destinations) are checked up front
// ============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::task::{DestinationRef, SeriesRef, Task};
use crate::transform::{TransformId, TransformSpec};
use crate::types::{Severity, SeriesId, Timestamp};
use crate::{
    DEFAULT_CANCEL_GRACE_MS, DEFAULT_CONCURRENCY, DEFAULT_CYCLE_TIMEOUT_MS, DEFAULT_HEALTH_WINDOW,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INTERVAL_MS, DEFAULT_LOOKBACK_SECS, MAX_CONCURRENCY,
    MIN_INTERVAL_MS, SHUTDOWN_GRACE_PERIOD_SECS,
};

// ----------------------------------------------------------------------------
// 5.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Scheduling and execution settings
    #[serde(default)]
    pub engine: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Source connectors by name
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    /// Destination connectors by name
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,

    /// Parametric transform instances by identifier
    #[serde(default)]
    pub transforms: BTreeMap<String, TransformSpec>,

    /// Tasks, in dispatch order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl EtlConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("METRICS_ETL_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        for (name, source) in &self.sources {
            source.validate(name)?;
        }
        for (name, destination) in &self.destinations {
            destination.validate(name)?;
        }

        let mut task_ids = HashSet::new();
        // The cache key is the bare series id, so one id must mean one source.
        let mut series_owner: HashMap<&SeriesId, &str> = HashMap::new();

        for task in &self.tasks {
            if !task_ids.insert(task.id()) {
                return Err(ConfigError::ValidationFailed {
                    message: format!("duplicate task id '{}'", task.id()),
                });
            }

            let referrer = format!("task '{}'", task.id());
            for SeriesRef { source, series } in task.inputs() {
                if !self.sources.contains_key(source.as_str()) {
                    return Err(ConfigError::unknown_reference("source", source.as_str(), referrer));
                }
                match series_owner.get(series) {
                    Some(owner) if *owner != source.as_str() => {
                        return Err(ConfigError::ValidationFailed {
                            message: format!(
                                "series '{}' is read from both '{}' and '{}'",
                                series, owner, source
                            ),
                        });
                    }
                    _ => {
                        series_owner.insert(series, source.as_str());
                    }
                }
            }

            for destination in task.destinations() {
                if !self.destinations.contains_key(destination.as_str()) {
                    return Err(ConfigError::unknown_reference(
                        "destination",
                        destination.as_str(),
                        referrer,
                    ));
                }
            }
        }

        Ok(())
    }

    /// A small, runnable example configuration.
    pub fn example() -> Self {
        let mut config = Self::default();

        let mut series = BTreeMap::new();
        series.insert(
            "cpu.load".to_string(),
            vec![(1_700_000_000, 0.2), (1_700_000_060, 0.5), (1_700_000_120, 0.9)],
        );
        config.sources.insert(
            "demo".into(),
            SourceConfig::Static(StaticSourceConfig {
                series,
                lookback_secs: DEFAULT_LOOKBACK_SECS,
            }),
        );
        config.sources.insert(
            "graphite".into(),
            SourceConfig::Graphite(GraphiteSourceConfig {
                url: "http://localhost:8080".into(),
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                lookback_secs: DEFAULT_LOOKBACK_SECS,
            }),
        );
        config.destinations.insert(
            "console".into(),
            DestinationConfig::Log(LogDestinationConfig { firing_only: false }),
        );
        config.transforms.insert(
            "cpu_high".into(),
            TransformSpec::Threshold {
                above: Some(0.8),
                below: None,
                severity: Severity::High,
            },
        );

        let task = Task::new(
            "cpu-load",
            vec![SeriesRef::new("demo", "cpu.load")],
            vec![TransformId::from("lastdatapoint"), TransformId::from("cpu_high")],
            vec![DestinationRef::from("console")],
        );
        if let Ok(task) = task {
            config.tasks.push(task);
        }
        config
    }

    /// Render the example configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// 5.2 General Engine Configuration
// ----------------------------------------------------------------------------

/// Scheduling and execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Engine instance name (for identification)
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Period between cycle starts in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Cycle deadline in milliseconds
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_ms: u64,

    /// Time cancelled tasks get before they are abandoned
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Concurrently executing tasks (0 = number of CPUs)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of recent cycles that decide health
    #[serde(default = "default_health_window")]
    pub health_window: usize,

    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Start the first cycle immediately instead of after one interval
    #[serde(default = "default_true")]
    pub run_immediately: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            interval_ms: default_interval(),
            cycle_timeout_ms: default_cycle_timeout(),
            cancel_grace_ms: default_cancel_grace(),
            concurrency: default_concurrency(),
            health_window: default_health_window(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            run_immediately: true,
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(ConfigError::invalid_value(
                "engine.interval_ms",
                format!("Interval must be at least {}ms", MIN_INTERVAL_MS),
            ));
        }
        if self.cycle_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "engine.cycle_timeout_ms",
                "Cycle timeout must be positive",
            ));
        }
        if self.cancel_grace_ms >= self.interval_ms {
            return Err(ConfigError::invalid_value(
                "engine.cancel_grace_ms",
                "Cancellation grace must be shorter than the interval",
            ));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::invalid_value(
                "engine.concurrency",
                format!("Concurrency cannot exceed {}", MAX_CONCURRENCY),
            ));
        }
        if self.health_window == 0 {
            return Err(ConfigError::invalid_value(
                "engine.health_window",
                "Health window must cover at least one cycle",
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Get effective concurrency (auto-detect if 0)
    pub fn effective_concurrency(&self) -> usize {
        let requested = if self.concurrency == 0 {
            num_cpus()
        } else {
            self.concurrency
        };
        requested.clamp(1, MAX_CONCURRENCY)
    }
}

fn default_instance_name() -> String {
    crate::ENGINE_NAME.into()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_cycle_timeout() -> u64 {
    DEFAULT_CYCLE_TIMEOUT_MS
}

fn default_cancel_grace() -> u64 {
    DEFAULT_CANCEL_GRACE_MS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_health_window() -> usize {
    DEFAULT_HEALTH_WINDOW
}

fn default_shutdown_timeout() -> u64 {
    SHUTDOWN_GRACE_PERIOD_SECS
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_lookback() -> u64 {
    DEFAULT_LOOKBACK_SECS
}

/// Helper to get number of CPUs
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

// ----------------------------------------------------------------------------
// 5.3 Source Configuration
// ----------------------------------------------------------------------------

/// A named source connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Graphite(GraphiteSourceConfig),
    Static(StaticSourceConfig),
}

impl SourceConfig {
    /// Extraction window ending at the cycle start
    pub fn lookback(&self) -> Duration {
        let secs = match self {
            SourceConfig::Graphite(c) => c.lookback_secs,
            SourceConfig::Static(c) => c.lookback_secs,
        };
        Duration::from_secs(secs)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.lookback().is_zero() {
            return Err(ConfigError::invalid_value(
                format!("sources.{}.lookback_secs", name),
                "Lookback must be positive",
            ));
        }
        match self {
            SourceConfig::Graphite(c) => {
                validate_url(&format!("sources.{}.url", name), &c.url)?;
                if c.timeout_secs == 0 {
                    return Err(ConfigError::invalid_value(
                        format!("sources.{}.timeout_secs", name),
                        "Timeout must be positive",
                    ));
                }
            }
            SourceConfig::Static(c) => {
                for (series, points) in &c.series {
                    let out_of_range = points
                        .iter()
                        .find(|(ts, _)| Timestamp::checked_from_secs(*ts).is_none());
                    if let Some((ts, _)) = out_of_range {
                        return Err(ConfigError::invalid_value(
                            format!("sources.{}.series.{}", name, series),
                            format!("Timestamp {} is out of range for epoch seconds", ts),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Graphite render API source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphiteSourceConfig {
    /// Base URL of graphite-web
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,
}

/// Inline points, for demos and dry runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSourceConfig {
    /// `[[epoch_secs, value], ...]` per series
    #[serde(default)]
    pub series: BTreeMap<String, Vec<(i64, f64)>>,

    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,
}

// ----------------------------------------------------------------------------
// 5.4 Destination Configuration
// ----------------------------------------------------------------------------

/// A named destination connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    Log(LogDestinationConfig),
    Webhook(WebhookDestinationConfig),
}

impl DestinationConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if let DestinationConfig::Webhook(c) = self {
            validate_url(&format!("destinations.{}.url", name), &c.url)?;
            if c.timeout_secs == 0 {
                return Err(ConfigError::invalid_value(
                    format!("destinations.{}.timeout_secs", name),
                    "Timeout must be positive",
                ));
            }
        }
        Ok(())
    }
}

/// Structured log output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogDestinationConfig {
    /// Only log alerts that are firing
    #[serde(default)]
    pub firing_only: bool,
}

/// JSON POST to an HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDestinationConfig {
    pub url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn validate_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(
            field,
            format!("'{}' is not an http(s) URL", url),
        ))
    }
}

// ----------------------------------------------------------------------------
// 5.5 Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also log to this file (daily rotation, JSON lines)
    #[serde(default)]
    pub file: Option<String>,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
