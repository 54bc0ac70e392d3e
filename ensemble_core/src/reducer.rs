//! Reducers: pure functions from same-shaped values to one value.

use crate::config::{AggregateConfig, AggregateMethod};
use crate::error::OrchestratorError;
use ensemble_env::{EnvError, ReduceOp, Shape, Value};

/// How a set of member values is collapsed into one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reducer {
    /// Arithmetic mean over all members
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    /// Element-wise quantile with linear interpolation, `q` in [0, 1]
    Quantile(f64),
}

impl Reducer {
    /// Builds a reducer from its configuration.
    pub fn from_config(config: &AggregateConfig) -> Result<Self, OrchestratorError> {
        let reducer = match config.method {
            AggregateMethod::Mean => Reducer::Mean,
            AggregateMethod::Sum => Reducer::Sum,
            AggregateMethod::Min => Reducer::Min,
            AggregateMethod::Max => Reducer::Max,
            AggregateMethod::Median => Reducer::Quantile(0.5),
            AggregateMethod::Quantile => {
                let q = config.options.get("q").copied().ok_or_else(|| {
                    OrchestratorError::config("quantile aggregation requires option \"q\"")
                })?;
                if !(0.0..=1.0).contains(&q) {
                    return Err(OrchestratorError::config(format!(
                        "quantile q must lie in [0, 1], got {}",
                        q
                    )));
                }
                Reducer::Quantile(q)
            }
        };
        Ok(reducer)
    }

    /// Reduces `values`. Returns `None` for an empty input.
    ///
    /// Every value counts toward the result, placeholders included.
    pub fn reduce(&self, values: &[Value]) -> Result<Option<Value>, EnvError> {
        let Some(first) = values.first() else {
            return Ok(None);
        };

        let reduced = match self {
            Reducer::Mean => fold(values, ReduceOp::Sum)?.scale(1.0 / values.len() as f64),
            Reducer::Sum => fold(values, ReduceOp::Sum)?,
            Reducer::Min => fold(values, ReduceOp::Min)?,
            Reducer::Max => fold(values, ReduceOp::Max)?,
            Reducer::Quantile(q) => quantile(values, first.shape(), *q)?,
        };
        Ok(Some(reduced))
    }
}

fn fold(values: &[Value], op: ReduceOp) -> Result<Value, EnvError> {
    let mut acc = values[0].clone();
    for value in &values[1..] {
        acc = acc.combine(value, op)?;
    }
    Ok(acc)
}

fn quantile(values: &[Value], shape: Shape, q: f64) -> Result<Value, EnvError> {
    if let Some(odd) = values.iter().find(|v| v.shape() != shape) {
        return Err(EnvError::ShapeMismatch {
            left: shape,
            right: odd.shape(),
        });
    }

    let n = values.len();
    let position = q * (n - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let weight = position - lo as f64;

    let elements: Vec<f64> = (0..values[0].len())
        .map(|i| {
            let mut column: Vec<f64> = values.iter().map(|v| v.as_slice()[i]).collect();
            column.sort_by(|a, b| a.total_cmp(b));
            column[lo] + (column[hi] - column[lo]) * weight
        })
        .collect();

    Ok(match shape {
        Shape::Scalar => Value::Scalar(elements[0]),
        Shape::Array(_) => Value::from(elements),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn config(method: AggregateMethod, q: Option<f64>) -> AggregateConfig {
        let mut options = BTreeMap::new();
        if let Some(q) = q {
            options.insert("q".to_string(), q);
        }
        AggregateConfig {
            interval: 1.0,
            method,
            options,
        }
    }

    #[test]
    fn test_mean_of_arrays() {
        let values = vec![Value::array(&[1.0, 1.0]), Value::array(&[3.0, 3.0])];
        let mean = Reducer::Mean.reduce(&values).unwrap().unwrap();
        assert_eq!(mean, Value::array(&[2.0, 2.0]));
    }

    #[test]
    fn test_mean_counts_zero_placeholders() {
        let values = vec![Value::array(&[0.0, 0.0]), Value::array(&[4.0, 4.0])];
        let mean = Reducer::Mean.reduce(&values).unwrap().unwrap();
        assert_eq!(mean, Value::array(&[2.0, 2.0]));
    }

    #[test]
    fn test_min_max_sum_scalars() {
        let values = vec![Value::Scalar(2.0), Value::Scalar(-1.0), Value::Scalar(5.0)];
        assert_eq!(Reducer::Min.reduce(&values).unwrap(), Some(Value::Scalar(-1.0)));
        assert_eq!(Reducer::Max.reduce(&values).unwrap(), Some(Value::Scalar(5.0)));
        assert_eq!(Reducer::Sum.reduce(&values).unwrap(), Some(Value::Scalar(6.0)));
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = vec![
            Value::array(&[1.0, 10.0]),
            Value::array(&[3.0, 30.0]),
            Value::array(&[2.0, 20.0]),
            Value::array(&[4.0, 40.0]),
        ];
        let median = Reducer::Quantile(0.5).reduce(&values).unwrap().unwrap();
        assert_relative_eq!(median.as_slice()[0], 2.5);
        assert_relative_eq!(median.as_slice()[1], 25.0);
    }

    #[test]
    fn test_empty_input_reduces_to_none() {
        assert_eq!(Reducer::Mean.reduce(&[]).unwrap(), None);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let values = vec![Value::array(&[1.0, 2.0]), Value::array(&[1.0])];
        assert!(Reducer::Mean.reduce(&values).is_err());
        assert!(Reducer::Quantile(0.5).reduce(&values).is_err());
    }

    #[test]
    fn test_from_config() {
        assert_eq!(Reducer::from_config(&config(AggregateMethod::Mean, None)).unwrap(), Reducer::Mean);
        assert_eq!(
            Reducer::from_config(&config(AggregateMethod::Median, None)).unwrap(),
            Reducer::Quantile(0.5)
        );
        assert!(Reducer::from_config(&config(AggregateMethod::Quantile, None)).is_err());
        assert!(Reducer::from_config(&config(AggregateMethod::Quantile, Some(1.5))).is_err());
    }

    proptest! {
        #[test]
        fn prop_mean_lies_between_min_and_max(xs in prop::collection::vec(-1e6f64..1e6, 1..20)) {
            let values: Vec<Value> = xs.iter().map(|x| Value::Scalar(*x)).collect();
            let mean = Reducer::Mean.reduce(&values).unwrap().unwrap().as_scalar().unwrap();
            let min = Reducer::Min.reduce(&values).unwrap().unwrap().as_scalar().unwrap();
            let max = Reducer::Max.reduce(&values).unwrap().unwrap().as_scalar().unwrap();
            prop_assert!(mean >= min - 1e-6 && mean <= max + 1e-6);
        }

        #[test]
        fn prop_quantile_bounds_match_min_max(xs in prop::collection::vec(-1e3f64..1e3, 1..20)) {
            let values: Vec<Value> = xs.iter().map(|x| Value::Scalar(*x)).collect();
            let q0 = Reducer::Quantile(0.0).reduce(&values).unwrap().unwrap();
            let q1 = Reducer::Quantile(1.0).reduce(&values).unwrap().unwrap();
            prop_assert_eq!(q0, Reducer::Min.reduce(&values).unwrap().unwrap());
            prop_assert_eq!(q1, Reducer::Max.reduce(&values).unwrap().unwrap());
        }
    }
}
