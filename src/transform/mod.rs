// ============================================================================
// TRANSFORMS
// ============================================================================
// Pure functions from an ordered sequence of responses to a new ordered
// sequence. A task's chain feeds the full output of stage i into stage i+1.
// ============================================================================

mod alerting;
mod builtin;
mod registry;

pub use alerting::{Stats, ThresholdTransform, ZScoreTransform};
pub use builtin::{
    register_builtins, Derivative, Ratio, Reduce, ScaleTransform, SumSeries, BUILTIN_TRANSFORMS,
};
pub use registry::{TransformRegistry, TransformRegistryBuilder};

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryResult, TransformError, TransformResult};
use crate::types::{MetricResponse, Severity};

// ----------------------------------------------------------------------------
// 3.1 Transform Trait
// ----------------------------------------------------------------------------

/// A stateless transform stage.
///
/// Implementations must be deterministic: the output depends only on the
/// input slice, never on wall-clock time or external state.
pub trait Transform: Send + Sync {
    /// Kind name used in error messages (e.g. `"threshold"`).
    fn name(&self) -> &str;

    /// Accepted number of input responses.
    fn arity(&self) -> Arity {
        Arity::Any
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>>;
}

/// Input count a transform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Any,
    AtLeast(usize),
    Exactly(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Any => true,
            Arity::AtLeast(n) => count >= n,
            Arity::Exactly(n) => count == n,
        }
    }

    /// Check `count` against this arity on behalf of `transform`.
    pub fn check(&self, transform: &str, count: usize) -> TransformResult<()> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(TransformError::Arity {
                transform: transform.to_string(),
                expected: self.to_string(),
                actual: count,
            })
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Any => write!(f, "any number of"),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Exactly(n) => write!(f, "exactly {}", n),
        }
    }
}

// ----------------------------------------------------------------------------
// 3.2 Transform Identity
// ----------------------------------------------------------------------------

/// Registry key of a transform (e.g. `"lastdatapoint"`, `"cpu_high"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformId(CompactString);

impl TransformId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TransformId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransformId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TransformId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// 3.3 Transform Chain
// ----------------------------------------------------------------------------

/// Failure of one chain stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Zero-based position in the chain
    pub stage: usize,
    pub transform: TransformId,
    pub error: TransformError,
}

impl Display for StageFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({}): {}", self.stage, self.transform, self.error)
    }
}

/// An ordered, resolved list of transform stages.
#[derive(Clone, Default)]
pub struct TransformChain {
    stages: Vec<(TransformId, Arc<dyn Transform>)>,
}

impl TransformChain {
    /// Look every identifier up in `registry`, failing on the first unknown one.
    pub fn resolve(ids: &[TransformId], registry: &TransformRegistry) -> RegistryResult<Self> {
        let stages = ids
            .iter()
            .map(|id| registry.lookup(id.as_str()).map(|t| (id.clone(), t)))
            .collect::<RegistryResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TransformId> {
        self.stages.iter().map(|(id, _)| id)
    }

    /// Run `input` through every stage in order.
    pub fn apply(&self, input: Vec<MetricResponse>) -> Result<Vec<MetricResponse>, StageFailure> {
        let mut current = input;
        for (stage, (id, transform)) in self.stages.iter().enumerate() {
            let fail = |error| StageFailure {
                stage,
                transform: id.clone(),
                error,
            };
            transform
                .arity()
                .check(transform.name(), current.len())
                .map_err(fail)?;
            current = transform.apply(&current).map_err(fail)?;
        }
        Ok(current)
    }
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

// ----------------------------------------------------------------------------
// 3.4 Configured Transform Instances
// ----------------------------------------------------------------------------

/// A parametric transform declared under `[transforms.<id>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    Threshold {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<f64>,
        #[serde(default)]
        severity: Severity,
    },
    Zscore {
        #[serde(default = "default_zscore_threshold")]
        threshold: f64,
        #[serde(default = "default_min_samples")]
        min_samples: usize,
        #[serde(default)]
        severity: Severity,
    },
    Scale {
        factor: f64,
    },
}

fn default_zscore_threshold() -> f64 {
    crate::DEFAULT_ZSCORE_THRESHOLD
}

fn default_min_samples() -> usize {
    crate::DEFAULT_ZSCORE_MIN_SAMPLES
}

impl TransformSpec {
    /// Build the transform this spec describes.
    pub fn instantiate(&self) -> TransformResult<Arc<dyn Transform>> {
        Ok(match *self {
            TransformSpec::Threshold {
                above,
                below,
                severity,
            } => Arc::new(ThresholdTransform::new(above, below, severity)?),
            TransformSpec::Zscore {
                threshold,
                min_samples,
                severity,
            } => Arc::new(ZScoreTransform::new(threshold, min_samples, severity)?),
            TransformSpec::Scale { factor } => Arc::new(ScaleTransform::new(factor)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataPoint, MetricValue, Timestamp};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn series(name: &str, values: &[(i64, f64)]) -> MetricResponse {
        MetricResponse::extracted(
            name.into(),
            "test",
            values
                .iter()
                .map(|(t, v)| DataPoint::new(Timestamp::from_secs(*t), *v))
                .collect(),
            Timestamp::EPOCH,
        )
    }

    fn registry() -> TransformRegistry {
        let mut builder = TransformRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        builder
            .register_spec(
                "cpu_high",
                &TransformSpec::Threshold {
                    above: Some(0.8),
                    below: None,
                    severity: Severity::High,
                },
            )
            .unwrap();
        builder.freeze()
    }

    fn chain(ids: &[&str]) -> TransformChain {
        let ids: Vec<TransformId> = ids.iter().map(|s| TransformId::from(*s)).collect();
        TransformChain::resolve(&ids, &registry()).unwrap()
    }

    #[test]
    fn test_arity_check() {
        assert!(Arity::Any.accepts(0));
        assert!(Arity::AtLeast(1).accepts(3));
        assert!(!Arity::AtLeast(1).accepts(0));
        assert!(Arity::Exactly(2).accepts(2));
        assert!(!Arity::Exactly(2).accepts(1));

        let err = Arity::Exactly(2).check("ratio", 3).unwrap_err();
        assert!(matches!(err, TransformError::Arity { actual: 3, .. }));
    }

    #[test]
    fn test_lastdatapoint_scenario() {
        let input = vec![series("cpu.load", &[(1, 0.2), (2, 0.5), (3, 0.9)])];
        let output = chain(&["lastdatapoint"]).apply(input).unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].series().as_str(), "cpu.load");
        assert_eq!(output[0].value(), &MetricValue::Scalar(0.9));
        assert_eq!(output[0].timestamp(), Timestamp::from_secs(3));
    }

    #[test]
    fn test_stage_output_feeds_next_stage() {
        let input = vec![series("cpu.load", &[(1, 0.2), (2, 0.95)])];
        let output = chain(&["lastdatapoint", "cpu_high"]).apply(input).unwrap();

        let alert = output[0].value().as_alert().unwrap();
        assert!(alert.is_firing());
        assert_eq!(alert.observed, 0.95);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_stage_failure_reports_position() {
        let input = vec![
            series("a", &[(1, 1.0)]),
            series("b", &[(1, 2.0)]),
            series("c", &[(1, 3.0)]),
        ];
        let failure = chain(&["lastdatapoint", "ratio"]).apply(input).unwrap_err();

        assert_eq!(failure.stage, 1);
        assert_eq!(failure.transform.as_str(), "ratio");
        assert!(matches!(failure.error, TransformError::Arity { actual: 3, .. }));
    }

    #[test]
    fn test_unknown_identifier_fails_resolution() {
        let ids = vec![TransformId::from("lastdatapoint"), TransformId::from("nope")];
        let err = TransformChain::resolve(&ids, &registry()).unwrap_err();
        assert_eq!(err, crate::error::RegistryError::UnknownTransform("nope".into()));
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let input = vec![series("a", &[(1, 1.0)])];
        let output = TransformChain::default().apply(input.clone()).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_spec_deserializes_from_toml() {
        let spec: TransformSpec = toml::from_str(
            r#"
            kind = "zscore"
            threshold = 2.5
            severity = "critical"
            "#,
        )
        .unwrap();
        assert_eq!(
            spec,
            TransformSpec::Zscore {
                threshold: 2.5,
                min_samples: crate::DEFAULT_ZSCORE_MIN_SAMPLES,
                severity: Severity::Critical,
            }
        );
    }

    proptest! {
        #[test]
        fn prop_chain_is_deterministic(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 2..50),
            other in prop::collection::vec(-1.0e6f64..1.0e6, 2..50),
        ) {
            let to_series = |name: &str, vals: &[f64]| {
                let pts: Vec<(i64, f64)> = vals.iter().enumerate().map(|(i, v)| (i as i64, *v)).collect();
                series(name, &pts)
            };
            let input = vec![to_series("a", &values), to_series("b", &other)];
            let chain = chain(&["derivative", "average", "sumseries"]);

            let first = chain.apply(input.clone());
            let second = chain.apply(input);
            prop_assert!(first.is_ok());
            prop_assert_eq!(format!("{:?}", first), format!("{:?}", second));
        }
    }
}
