// ----------------------------------------------------------------------------
// 3.7 Alerting Transforms
// ----------------------------------------------------------------------------
// Parametric transforms that turn values into alert states. Instances are
// declared under `[transforms.<id>]` and built through `TransformSpec`.
// ----------------------------------------------------------------------------

use super::Transform;
use crate::error::{TransformError, TransformResult};
use crate::types::{AlertState, AlertValue, MetricResponse, MetricValue, Severity};

/// Statistical helpers for anomaly scoring.
pub struct Stats;

impl Stats {
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Sample variance.
    pub fn variance(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let mean = Self::mean(values);
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    }

    pub fn std_dev(values: &[f64]) -> f64 {
        Self::variance(values).sqrt()
    }

    /// Z-score of `value` against `baseline`.
    ///
    /// With a flat baseline the score is 0 when `value` equals the mean and
    /// infinite otherwise.
    pub fn z_score(value: f64, baseline: &[f64]) -> f64 {
        let mean = Self::mean(baseline);
        let std = Self::std_dev(baseline);
        if std == 0.0 {
            if value == mean {
                0.0
            } else {
                f64::INFINITY.copysign(value - mean)
            }
        } else {
            (value - mean) / std
        }
    }
}

fn check_finite(transform: &str, name: &str, value: f64) -> TransformResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TransformError::invalid_parameter(
            transform,
            format!("{} must be finite, got {}", name, value),
        ))
    }
}

// ----------------------------------------------------------------------------
// Threshold
// ----------------------------------------------------------------------------

/// Fires when a value crosses a static bound.
#[derive(Debug, Clone)]
pub struct ThresholdTransform {
    above: Option<f64>,
    below: Option<f64>,
    severity: Severity,
}

impl ThresholdTransform {
    pub fn new(above: Option<f64>, below: Option<f64>, severity: Severity) -> TransformResult<Self> {
        if above.is_none() && below.is_none() {
            return Err(TransformError::invalid_parameter(
                "threshold",
                "at least one of 'above' or 'below' is required",
            ));
        }
        if let Some(a) = above {
            check_finite("threshold", "above", a)?;
        }
        if let Some(b) = below {
            check_finite("threshold", "below", b)?;
        }
        Ok(Self {
            above,
            below,
            severity,
        })
    }

    fn evaluate(&self, value: f64) -> AlertValue {
        let crossed = match (self.above, self.below) {
            (Some(a), _) if value > a => Some((a, format!("{} above {}", value, a))),
            (_, Some(b)) if value < b => Some((b, format!("{} below {}", value, b))),
            _ => None,
        };
        match crossed {
            Some((threshold, message)) => AlertValue {
                state: AlertState::Firing,
                severity: self.severity,
                observed: value,
                threshold,
                message,
            },
            None => AlertValue {
                state: AlertState::Ok,
                severity: self.severity,
                observed: value,
                threshold: self.above.or(self.below).unwrap_or_default(),
                message: "within bounds".to_string(),
            },
        }
    }
}

impl Transform for ThresholdTransform {
    fn name(&self) -> &str {
        "threshold"
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        input
            .iter()
            .map(|resp| {
                let value = resp.representative().ok_or_else(|| TransformError::EmptySeries {
                    transform: self.name().to_string(),
                    series: resp.series().clone(),
                })?;
                Ok(resp.derive(MetricValue::Alert(self.evaluate(value)), resp.timestamp()))
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Z-Score Anomaly
// ----------------------------------------------------------------------------

/// Scores the newest point against the points before it.
#[derive(Debug, Clone)]
pub struct ZScoreTransform {
    threshold: f64,
    min_samples: usize,
    severity: Severity,
}

impl ZScoreTransform {
    pub fn new(threshold: f64, min_samples: usize, severity: Severity) -> TransformResult<Self> {
        check_finite("zscore", "threshold", threshold)?;
        if threshold <= 0.0 {
            return Err(TransformError::invalid_parameter(
                "zscore",
                format!("threshold must be positive, got {}", threshold),
            ));
        }
        // Last point plus a baseline with a defined sample deviation.
        if min_samples < 3 {
            return Err(TransformError::invalid_parameter(
                "zscore",
                format!("min_samples must be at least 3, got {}", min_samples),
            ));
        }
        Ok(Self {
            threshold,
            min_samples,
            severity,
        })
    }

    fn score(&self, values: &[f64]) -> AlertValue {
        let (state, score, message) = match values.split_last() {
            Some((last, baseline)) if values.len() >= self.min_samples => {
                let z = Stats::z_score(*last, baseline);
                if z.abs() > self.threshold {
                    (AlertState::Firing, z, format!("z-score {:.2} exceeds {}", z, self.threshold))
                } else {
                    (AlertState::Ok, z, format!("z-score {:.2}", z))
                }
            }
            _ => (
                AlertState::Ok,
                0.0,
                format!("{} of {} samples", values.len(), self.min_samples),
            ),
        };
        AlertValue {
            state,
            severity: self.severity,
            observed: score,
            threshold: self.threshold,
            message,
        }
    }
}

impl Transform for ZScoreTransform {
    fn name(&self) -> &str {
        "zscore"
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        input
            .iter()
            .map(|resp| {
                if let MetricValue::Alert(_) = resp.value() {
                    return Err(TransformError::UnsupportedValue {
                        transform: self.name().to_string(),
                        series: resp.series().clone(),
                        value_type: resp.value().type_name().to_string(),
                    });
                }
                let values: Vec<f64> = resp.points().iter().map(|p| p.value).collect();
                Ok(resp.derive(MetricValue::Alert(self.score(&values)), resp.timestamp()))
            })
            .collect()
    }
}
