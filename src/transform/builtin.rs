// ----------------------------------------------------------------------------
// 3.6 Built-in Transforms
// ----------------------------------------------------------------------------
// Parameterless transforms registered under fixed identifiers at startup.
// ----------------------------------------------------------------------------

use std::borrow::Cow;

use super::{Arity, Transform, TransformRegistryBuilder};
use crate::error::{RegistryResult, TransformError, TransformResult};
use crate::types::{DataPoint, MetricResponse, MetricValue, SeriesId, Timestamp};

/// Identifiers registered by [`register_builtins`], sorted.
pub const BUILTIN_TRANSFORMS: &[&str] = &[
    "average",
    "derivative",
    "firstdatapoint",
    "lastdatapoint",
    "max",
    "min",
    "ratio",
    "sum",
    "sumseries",
];

/// Register every built-in transform. Fails if any identifier is taken.
pub fn register_builtins(builder: &mut TransformRegistryBuilder) -> RegistryResult<()> {
    builder.register("lastdatapoint", Reduce::last())?;
    builder.register("firstdatapoint", Reduce::first())?;
    builder.register("average", Reduce::average())?;
    builder.register("min", Reduce::min())?;
    builder.register("max", Reduce::max())?;
    builder.register("sum", Reduce::sum())?;
    builder.register("derivative", Derivative)?;
    builder.register("sumseries", SumSeries)?;
    builder.register("ratio", Ratio)?;
    Ok(())
}

/// Samples of `resp`, rejecting alert values.
fn numeric<'a>(transform: &str, resp: &'a MetricResponse) -> TransformResult<Cow<'a, [DataPoint]>> {
    match resp.value() {
        MetricValue::Alert(_) => Err(TransformError::UnsupportedValue {
            transform: transform.to_string(),
            series: resp.series().clone(),
            value_type: resp.value().type_name().to_string(),
        }),
        _ => Ok(resp.points()),
    }
}

/// Newest value of `resp`, rejecting alerts and empty series.
fn last_value(transform: &str, resp: &MetricResponse) -> TransformResult<f64> {
    numeric(transform, resp)?
        .last()
        .map(|p| p.value)
        .ok_or_else(|| TransformError::EmptySeries {
            transform: transform.to_string(),
            series: resp.series().clone(),
        })
}

fn combined_timestamp(input: &[MetricResponse]) -> Timestamp {
    input
        .iter()
        .map(|r| r.timestamp())
        .max()
        .unwrap_or(Timestamp::EPOCH)
}

fn combined_series(function: &str, input: &[MetricResponse]) -> SeriesId {
    let names: Vec<&str> = input.iter().map(|r| r.series().as_str()).collect();
    SeriesId::new(format!("{}({})", function, names.join(",")))
}

// ----------------------------------------------------------------------------
// Reductions
// ----------------------------------------------------------------------------

/// Reduces each input series to a single scalar sample.
#[derive(Clone, Copy)]
pub struct Reduce {
    name: &'static str,
    /// Called with a non-empty slice.
    reducer: fn(&[DataPoint]) -> DataPoint,
}

impl Reduce {
    pub fn new(name: &'static str, reducer: fn(&[DataPoint]) -> DataPoint) -> Self {
        Self { name, reducer }
    }

    pub fn last() -> Self {
        Self::new("lastdatapoint", |points| points[points.len() - 1])
    }

    pub fn first() -> Self {
        Self::new("firstdatapoint", |points| points[0])
    }

    pub fn average() -> Self {
        Self::new("average", |points| {
            let mean = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
            DataPoint::new(points[points.len() - 1].timestamp, mean)
        })
    }

    pub fn sum() -> Self {
        Self::new("sum", |points| {
            let total = points.iter().map(|p| p.value).sum::<f64>();
            DataPoint::new(points[points.len() - 1].timestamp, total)
        })
    }

    pub fn min() -> Self {
        Self::new("min", |points| {
            points[1..]
                .iter()
                .fold(points[0], |best, p| if p.value < best.value { *p } else { best })
        })
    }

    pub fn max() -> Self {
        Self::new("max", |points| {
            points[1..]
                .iter()
                .fold(points[0], |best, p| if p.value > best.value { *p } else { best })
        })
    }
}

impl std::fmt::Debug for Reduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Reduce").field(&self.name).finish()
    }
}

impl Transform for Reduce {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        input
            .iter()
            .map(|resp| {
                let points = numeric(self.name, resp)?;
                if points.is_empty() {
                    return Err(TransformError::EmptySeries {
                        transform: self.name.to_string(),
                        series: resp.series().clone(),
                    });
                }
                let reduced = (self.reducer)(&points);
                Ok(resp.derive(MetricValue::Scalar(reduced.value), reduced.timestamp))
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Derivative
// ----------------------------------------------------------------------------

/// Per-second rate of change between consecutive points.
#[derive(Debug, Clone, Copy, Default)]
pub struct Derivative;

impl Transform for Derivative {
    fn name(&self) -> &str {
        "derivative"
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        input
            .iter()
            .map(|resp| {
                let points = numeric(self.name(), resp)?;
                let mut rates = Vec::with_capacity(points.len().saturating_sub(1));
                for pair in points.windows(2) {
                    let elapsed = pair[1].timestamp.duration_since(pair[0].timestamp);
                    if elapsed.is_zero() {
                        return Err(TransformError::Undefined {
                            transform: self.name().to_string(),
                            series: resp.series().clone(),
                            message: format!("non-increasing timestamp at {}", pair[1].timestamp),
                        });
                    }
                    let rate = (pair[1].value - pair[0].value) / elapsed.as_secs_f64();
                    rates.push(DataPoint::new(pair[1].timestamp, rate));
                }
                Ok(resp.derive(MetricValue::Points(rates), resp.timestamp()))
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Scale
// ----------------------------------------------------------------------------

/// Multiplies every value by a constant factor.
#[derive(Debug, Clone, Copy)]
pub struct ScaleTransform {
    factor: f64,
}

impl ScaleTransform {
    pub fn new(factor: f64) -> TransformResult<Self> {
        if !factor.is_finite() {
            return Err(TransformError::invalid_parameter(
                "scale",
                format!("factor must be finite, got {}", factor),
            ));
        }
        Ok(Self { factor })
    }
}

impl Transform for ScaleTransform {
    fn name(&self) -> &str {
        "scale"
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        input
            .iter()
            .map(|resp| {
                let value = match resp.value() {
                    MetricValue::Scalar(v) => MetricValue::Scalar(v * self.factor),
                    _ => MetricValue::Points(
                        numeric(self.name(), resp)?
                            .iter()
                            .map(|p| DataPoint::new(p.timestamp, p.value * self.factor))
                            .collect(),
                    ),
                };
                Ok(resp.derive(value, resp.timestamp()))
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Combinators
// ----------------------------------------------------------------------------

/// Sums the newest value of every input into one series.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumSeries;

impl Transform for SumSeries {
    fn name(&self) -> &str {
        "sumseries"
    }

    fn arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        self.arity().check(self.name(), input.len())?;
        let mut total = 0.0;
        for resp in input {
            total += last_value(self.name(), resp)?;
        }
        let series = combined_series("sumSeries", input);
        Ok(vec![input[0].derive_as(
            series,
            MetricValue::Scalar(total),
            combined_timestamp(input),
        )])
    }
}

/// Divides the newest value of the first input by that of the second.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ratio;

impl Transform for Ratio {
    fn name(&self) -> &str {
        "ratio"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(2)
    }

    fn apply(&self, input: &[MetricResponse]) -> TransformResult<Vec<MetricResponse>> {
        self.arity().check(self.name(), input.len())?;
        let numerator = last_value(self.name(), &input[0])?;
        let denominator = last_value(self.name(), &input[1])?;
        let series = combined_series("ratio", input);
        if denominator == 0.0 {
            return Err(TransformError::Undefined {
                transform: self.name().to_string(),
                series,
                message: format!("division by zero ('{}' is 0)", input[1].series()),
            });
        }
        Ok(vec![input[0].derive_as(
            series,
            MetricValue::Scalar(numerator / denominator),
            combined_timestamp(input),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertState, AlertValue, Severity};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

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

    fn alert(name: &str) -> MetricResponse {
        MetricResponse::new(
            name.into(),
            MetricValue::Alert(AlertValue {
                state: AlertState::Firing,
                severity: Severity::High,
                observed: 1.0,
                threshold: 0.5,
                message: "above".into(),
            }),
            "test",
            Timestamp::from_secs(1),
        )
    }

    #[rstest]
    #[case(Reduce::last(), 3, 0.9)]
    #[case(Reduce::first(), 1, 0.2)]
    #[case(Reduce::min(), 1, 0.2)]
    #[case(Reduce::max(), 3, 0.9)]
    #[case(Reduce::sum(), 3, 1.6)]
    fn test_reductions(#[case] reduce: Reduce, #[case] at: i64, #[case] expected: f64) {
        let input = [series("cpu.load", &[(1, 0.2), (2, 0.5), (3, 0.9)])];
        let output = reduce.apply(&input).unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].timestamp(), Timestamp::from_secs(at));
        match output[0].value() {
            MetricValue::Scalar(v) => assert!((v - expected).abs() < 1e-9, "{} != {}", v, expected),
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_average() {
        let output = Reduce::average()
            .apply(&[series("a", &[(1, 1.0), (2, 2.0), (3, 6.0)])])
            .unwrap();
        assert_eq!(output[0].value(), &MetricValue::Scalar(3.0));
        assert_eq!(output[0].timestamp(), Timestamp::from_secs(3));
    }

    #[test]
    fn test_reduction_preserves_input_order() {
        let input = [series("b", &[(1, 2.0)]), series("a", &[(1, 1.0)])];
        let output = Reduce::last().apply(&input).unwrap();
        let names: Vec<&str> = output.iter().map(|r| r.series().as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_reduction_errors() {
        let err = Reduce::last().apply(&[series("empty", &[])]).unwrap_err();
        assert!(matches!(err, TransformError::EmptySeries { ref series, .. } if series.as_str() == "empty"));

        let err = Reduce::max().apply(&[alert("cpu")]).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_derivative() {
        let output = Derivative
            .apply(&[series("bytes", &[(0, 100.0), (10, 200.0), (20, 150.0)])])
            .unwrap();
        assert_eq!(
            output[0].value(),
            &MetricValue::Points(vec![
                DataPoint::new(Timestamp::from_secs(10), 10.0),
                DataPoint::new(Timestamp::from_secs(20), -5.0),
            ])
        );

        let err = Derivative
            .apply(&[series("dup", &[(5, 1.0), (5, 2.0)])])
            .unwrap_err();
        assert!(matches!(err, TransformError::Undefined { .. }));
    }

    #[test]
    fn test_scale() {
        let scale = ScaleTransform::new(100.0).unwrap();
        let output = scale
            .apply(&[
                series("ratio", &[(1, 0.25)]),
                MetricResponse::new("s".into(), MetricValue::Scalar(0.5), "test", Timestamp::EPOCH),
            ])
            .unwrap();
        assert_eq!(
            output[0].value(),
            &MetricValue::Points(vec![DataPoint::new(Timestamp::from_secs(1), 25.0)])
        );
        assert_eq!(output[1].value(), &MetricValue::Scalar(50.0));
        assert!(ScaleTransform::new(f64::NAN).is_err());
    }

    #[test]
    fn test_sumseries_combines_inputs() {
        let output = SumSeries
            .apply(&[
                series("web1.requests", &[(1, 5.0), (2, 10.0)]),
                series("web2.requests", &[(1, 7.0), (3, 20.0)]),
            ])
            .unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].series().as_str(), "sumSeries(web1.requests,web2.requests)");
        assert_eq!(output[0].value(), &MetricValue::Scalar(30.0));
        assert_eq!(output[0].timestamp(), Timestamp::from_secs(3));
    }

    #[test]
    fn test_ratio() {
        let output = Ratio
            .apply(&[series("errors", &[(1, 5.0)]), series("requests", &[(1, 50.0)])])
            .unwrap();
        assert_eq!(output[0].series().as_str(), "ratio(errors,requests)");
        assert_eq!(output[0].value(), &MetricValue::Scalar(0.1));

        let err = Ratio
            .apply(&[series("errors", &[(1, 5.0)]), series("requests", &[(1, 0.0)])])
            .unwrap_err();
        assert!(matches!(err, TransformError::Undefined { .. }));

        let err = Ratio.apply(&[series("errors", &[(1, 5.0)])]).unwrap_err();
        assert!(matches!(err, TransformError::Arity { actual: 1, .. }));
    }
}
