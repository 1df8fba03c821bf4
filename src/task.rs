// ============================================================================
// TASK MODEL
// ============================================================================
// A task names the series it reads, the transform chain it applies and the
// destinations it writes to. Tasks are built from configuration once and
// never change afterwards.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ExtractError, FailureKind, LoadError};
use crate::transform::{StageFailure, TransformId};
use crate::types::SeriesId;

// ----------------------------------------------------------------------------
// 4.1 Identifiers & References
// ----------------------------------------------------------------------------

/// Unique name of a task within a configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(CompactString);

impl TaskId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A series read from a named source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesRef {
    pub source: CompactString,
    pub series: SeriesId,
}

impl SeriesRef {
    pub fn new(source: impl Into<CompactString>, series: impl Into<SeriesId>) -> Self {
        Self {
            source: source.into(),
            series: series.into(),
        }
    }
}

impl Display for SeriesRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.series)
    }
}

/// Name of a configured destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationRef(CompactString);

impl DestinationRef {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for DestinationRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// 4.2 Task
// ----------------------------------------------------------------------------

/// Serialized shape of a `[[tasks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    id: TaskId,
    inputs: Vec<SeriesRef>,
    #[serde(default)]
    chain: Vec<TransformId>,
    #[serde(default)]
    destinations: Vec<DestinationRef>,
}

/// One unit of work dispatched every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TaskSpec", into = "TaskSpec")]
pub struct Task {
    id: TaskId,
    inputs: Vec<SeriesRef>,
    chain: Vec<TransformId>,
    destinations: Vec<DestinationRef>,
}

impl Task {
    /// Build a task. Requires a non-empty id and at least one input.
    pub fn new(
        id: impl Into<TaskId>,
        inputs: Vec<SeriesRef>,
        chain: Vec<TransformId>,
        destinations: Vec<DestinationRef>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.as_str().trim().is_empty() {
            return Err(ConfigError::missing_field("tasks.id"));
        }
        if inputs.is_empty() {
            return Err(ConfigError::invalid_value(
                format!("tasks.{}.inputs", id),
                "a task needs at least one input series",
            ));
        }
        Ok(Self {
            id,
            inputs,
            chain,
            destinations,
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn inputs(&self) -> &[SeriesRef] {
        &self.inputs
    }

    pub fn chain(&self) -> &[TransformId] {
        &self.chain
    }

    pub fn destinations(&self) -> &[DestinationRef] {
        &self.destinations
    }
}

impl TryFrom<TaskSpec> for Task {
    type Error = ConfigError;

    fn try_from(spec: TaskSpec) -> Result<Self, Self::Error> {
        Task::new(spec.id, spec.inputs, spec.chain, spec.destinations)
    }
}

impl From<Task> for TaskSpec {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            inputs: task.inputs,
            chain: task.chain,
            destinations: task.destinations,
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Task Outcome
// ----------------------------------------------------------------------------

/// A series that could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFailure {
    pub source: CompactString,
    pub series: SeriesId,
    pub error: ExtractError,
}

/// A response one destination did not accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub destination: DestinationRef,
    pub series: SeriesId,
    pub error: LoadError,
}

/// What happened to one task during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction_errors: Vec<SeriesFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_error: Option<StageFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_errors: Vec<LoadFailure>,
    /// Task execution panicked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic: Option<String>,
    /// Successful destination acknowledgements
    pub loaded: usize,
    pub elapsed_ms: u64,
}

impl TaskOutcome {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            extraction_errors: Vec::new(),
            transform_error: None,
            load_errors: Vec::new(),
            panic: None,
            loaded: 0,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.extraction_errors.is_empty()
            && self.transform_error.is_none()
            && self.load_errors.is_empty()
            && self.panic.is_none()
    }

    /// Kinds of every recorded failure, in stage order.
    pub fn failure_kinds(&self) -> Vec<FailureKind> {
        let mut kinds: Vec<FailureKind> =
            self.extraction_errors.iter().map(|f| f.error.kind()).collect();
        if let Some(failure) = &self.transform_error {
            kinds.push(failure.error.kind());
        }
        kinds.extend(self.load_errors.iter().map(|f| f.error.kind()));
        kinds
    }
}
