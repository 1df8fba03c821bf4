// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every stage of the pipeline. Designed for:
// - Clear categorisation into failure kinds for cycle outcomes
// - Retry eligibility decided from the error kind alone
// - Typed propagation with `?`, no stringly-typed errors inside the engine
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SeriesId;

// ----------------------------------------------------------------------------
// 1.1 Umbrella Error
// ----------------------------------------------------------------------------

/// The main error type for the engine.
///
/// Only startup-time failures (configuration, registry, composition) ever
/// travel through this type; per-task failures are captured into cycle
/// outcomes instead.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EtlError {
    /// Check whether the failed operation may succeed on a later cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::Config(_) => false,
            EtlError::Registry(_) => false,
            EtlError::Extract(e) => e.is_retryable(),
            EtlError::Load(e) => e.is_retryable(),
            EtlError::Transform(_) => false,
            EtlError::Io(_) => true,
            EtlError::Internal(_) => false,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            EtlError::Config(_) => "config",
            EtlError::Registry(_) => "registry",
            EtlError::Extract(_) => "extract",
            EtlError::Load(_) => "load",
            EtlError::Transform(_) => "transform",
            EtlError::Io(_) => "io",
            EtlError::Internal(_) => "internal",
        }
    }

    /// Get suggested recovery action.
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            EtlError::Config(_) | EtlError::Registry(_) => RecoveryHint::FixConfiguration,
            EtlError::Extract(e) => e.recovery_hint(),
            EtlError::Load(e) => e.recovery_hint(),
            EtlError::Transform(_) => RecoveryHint::FixConfiguration,
            EtlError::Io(_) => RecoveryHint::RetryNextCycle,
            EtlError::Internal(_) => RecoveryHint::None,
        }
    }
}

/// Hints for how to recover from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryHint {
    /// No recovery possible
    None,
    /// Transient; the next cycle starts with a fresh cache and tries again
    RetryNextCycle,
    /// Permanent until the configuration changes
    FixConfiguration,
}

/// Failure classification carried in cycle outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    SeriesNotFound,
    Transform,
    DestinationUnavailable,
    Rejected,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::SourceUnavailable
                | FailureKind::DestinationUnavailable
                | FailureKind::Cancelled
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::SourceUnavailable => "source_unavailable",
            FailureKind::SeriesNotFound => "series_not_found",
            FailureKind::Transform => "transform",
            FailureKind::DestinationUnavailable => "destination_unavailable",
            FailureKind::Rejected => "rejected",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ----------------------------------------------------------------------------
// 1.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Unknown {what} '{name}' referenced by {referrer}")]
    UnknownReference {
        what: &'static str,
        name: String,
        referrer: String,
    },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        ConfigError::MissingField {
            field: field.into(),
        }
    }

    pub fn unknown_reference(
        what: &'static str,
        name: impl Into<String>,
        referrer: impl Into<String>,
    ) -> Self {
        ConfigError::UnknownReference {
            what,
            name: name.into(),
            referrer: referrer.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 1.3 Registry Errors
// ----------------------------------------------------------------------------

/// Errors from the transform registry. Both are startup-fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Transform identifier '{0}' is already registered")]
    DuplicateIdentifier(String),

    #[error("Unknown transform '{0}'")]
    UnknownTransform(String),
}

// ----------------------------------------------------------------------------
// 1.4 Extraction Errors
// ----------------------------------------------------------------------------

/// Errors returned by a source connector's extract operation.
///
/// Cloneable: the per-cycle cache stores a failed extraction and hands the
/// same failure to every task that references the series.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractError {
    #[error("Source '{source_name}' unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Series '{series}' not found in source '{source_name}'")]
    SeriesNotFound { source_name: String, series: SeriesId },

    #[error("Extraction of '{series}' cancelled")]
    Cancelled { series: SeriesId },
}

impl ExtractError {
    pub fn unavailable(source: impl Into<String>, message: impl Into<String>) -> Self {
        ExtractError::SourceUnavailable {
            source_name: source.into(),
            message: message.into(),
        }
    }

    pub fn not_found(source: impl Into<String>, series: SeriesId) -> Self {
        ExtractError::SeriesNotFound {
            source_name: source.into(),
            series,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            ExtractError::SourceUnavailable { .. } | ExtractError::Cancelled { .. } => {
                RecoveryHint::RetryNextCycle
            }
            ExtractError::SeriesNotFound { .. } => RecoveryHint::FixConfiguration,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::SourceUnavailable { .. } => FailureKind::SourceUnavailable,
            ExtractError::SeriesNotFound { .. } => FailureKind::SeriesNotFound,
            ExtractError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

// ----------------------------------------------------------------------------
// 1.5 Load Errors
// ----------------------------------------------------------------------------

/// Errors returned by a destination connector's load operation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadError {
    #[error("Destination '{destination}' unavailable: {message}")]
    DestinationUnavailable { destination: String, message: String },

    #[error("Destination '{destination}' rejected payload: {message}")]
    Rejected { destination: String, message: String },

    #[error("Load into '{destination}' cancelled")]
    Cancelled { destination: String },
}

impl LoadError {
    pub fn unavailable(destination: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::DestinationUnavailable {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn rejected(destination: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Rejected {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            LoadError::DestinationUnavailable { .. } | LoadError::Cancelled { .. } => {
                RecoveryHint::RetryNextCycle
            }
            LoadError::Rejected { .. } => RecoveryHint::FixConfiguration,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            LoadError::DestinationUnavailable { .. } => FailureKind::DestinationUnavailable,
            LoadError::Rejected { .. } => FailureKind::Rejected,
            LoadError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

// ----------------------------------------------------------------------------
// 1.6 Transform Errors
// ----------------------------------------------------------------------------

/// Errors raised while applying a transform stage.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformError {
    #[error("Transform '{transform}' expects {expected} input(s), got {actual}")]
    Arity {
        transform: String,
        expected: String,
        actual: usize,
    },

    #[error("Transform '{transform}' received an empty series '{series}'")]
    EmptySeries { transform: String, series: SeriesId },

    #[error("Transform '{transform}' cannot handle {value_type} value of '{series}'")]
    UnsupportedValue {
        transform: String,
        series: SeriesId,
        value_type: String,
    },

    #[error("Transform '{transform}' has invalid parameter: {message}")]
    InvalidParameter { transform: String, message: String },

    #[error("Transform '{transform}' result undefined for '{series}': {message}")]
    Undefined {
        transform: String,
        series: SeriesId,
        message: String,
    },
}

impl TransformError {
    pub fn invalid_parameter(transform: impl Into<String>, message: impl Into<String>) -> Self {
        TransformError::InvalidParameter {
            transform: transform.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::Transform
    }
}

// ----------------------------------------------------------------------------
// 1.7 Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for engine operations
pub type EtlResult<T> = Result<T, EtlError>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for source extraction
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type for destination loads
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for transform application
pub type TransformResult<T> = Result<T, TransformError>;
