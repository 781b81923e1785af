//! Aggregate functions and their partial state.
//!
//! Each function has a lift (fold one input value in), an associative and
//! commutative combine (merge two partials), and a lower (partial to output
//! value). Only the combine crosses thread boundaries.

use serde::{Deserialize, Serialize};
use slicewise_core::schema::DataType;
use slicewise_core::types::Scalar;

use crate::error::{Result, WindowError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregation {
    /// Column the function reads, if any.
    pub fn input_column(&self) -> Option<&str> {
        match self {
            Aggregation::Count => None,
            Aggregation::Sum(c) | Aggregation::Avg(c) | Aggregation::Min(c) | Aggregation::Max(c) => {
                Some(c)
            }
        }
    }

    pub fn default_alias(&self) -> String {
        match self {
            Aggregation::Count => "count".to_string(),
            Aggregation::Sum(c) => format!("sum_{c}"),
            Aggregation::Avg(c) => format!("avg_{c}"),
            Aggregation::Min(c) => format!("min_{c}"),
            Aggregation::Max(c) => format!("max_{c}"),
        }
    }

    pub fn output_type(&self) -> DataType {
        match self {
            Aggregation::Count => DataType::Int64,
            _ => DataType::Float64,
        }
    }

    /// Identity element of the combine.
    pub fn identity(&self) -> PartialAggregate {
        match self {
            Aggregation::Count => PartialAggregate::Count(0),
            Aggregation::Sum(_) => PartialAggregate::Sum(0.0),
            Aggregation::Avg(_) => PartialAggregate::Avg { sum: 0.0, count: 0 },
            Aggregation::Min(_) => PartialAggregate::Min(None),
            Aggregation::Max(_) => PartialAggregate::Max(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialAggregate {
    Count(u64),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<f64>),
    Max(Option<f64>),
}

impl PartialAggregate {
    pub fn kind(&self) -> &'static str {
        match self {
            PartialAggregate::Count(_) => "count",
            PartialAggregate::Sum(_) => "sum",
            PartialAggregate::Avg { .. } => "avg",
            PartialAggregate::Min(_) => "min",
            PartialAggregate::Max(_) => "max",
        }
    }

    /// Fold one input. Nulls (`None`) are skipped except by COUNT, which counts rows.
    pub fn lift(&mut self, value: Option<f64>) {
        match (self, value) {
            (PartialAggregate::Count(n), _) => *n += 1,
            (PartialAggregate::Sum(s), Some(v)) => *s += v,
            (PartialAggregate::Avg { sum, count }, Some(v)) => {
                *sum += v;
                *count += 1;
            }
            (PartialAggregate::Min(m), Some(v)) => *m = Some(m.map_or(v, |cur| cur.min(v))),
            (PartialAggregate::Max(m), Some(v)) => *m = Some(m.map_or(v, |cur| cur.max(v))),
            (_, None) => {}
        }
    }

    pub fn combine(&mut self, other: &PartialAggregate) -> Result<()> {
        match (self, other) {
            (PartialAggregate::Count(a), PartialAggregate::Count(b)) => *a += b,
            (PartialAggregate::Sum(a), PartialAggregate::Sum(b)) => *a += b,
            (
                PartialAggregate::Avg { sum, count },
                PartialAggregate::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (PartialAggregate::Min(a), PartialAggregate::Min(b)) => *a = merge_opt(*a, *b, f64::min),
            (PartialAggregate::Max(a), PartialAggregate::Max(b)) => *a = merge_opt(*a, *b, f64::max),
            (a, b) => {
                return Err(WindowError::IncompatibleState(format!(
                    "cannot combine {} with {}",
                    a.kind(),
                    b.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn lower(&self) -> Scalar {
        match self {
            PartialAggregate::Count(n) => Scalar::I64(*n as i64),
            PartialAggregate::Sum(s) => Scalar::F64(*s),
            PartialAggregate::Avg { count: 0, .. } => Scalar::Null,
            PartialAggregate::Avg { sum, count } => Scalar::F64(sum / *count as f64),
            PartialAggregate::Min(m) | PartialAggregate::Max(m) => {
                m.map(Scalar::F64).unwrap_or(Scalar::Null)
            }
        }
    }
}

fn merge_opt(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// One partial per configured aggregate, in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    entries: Vec<PartialAggregate>,
}

impl Accumulator {
    pub fn new(aggregates: &[Aggregation]) -> Self {
        Self {
            entries: aggregates.iter().map(Aggregation::identity).collect(),
        }
    }

    pub fn entry_size(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[PartialAggregate] {
        &self.entries
    }

    /// Fold one record; `inputs[i]` feeds aggregate `i`.
    pub fn lift(&mut self, inputs: &[Option<f64>]) -> Result<()> {
        if inputs.len() != self.entries.len() {
            return Err(WindowError::IncompatibleState(format!(
                "record carries {} inputs for {} aggregates",
                inputs.len(),
                self.entries.len()
            )));
        }
        for (entry, value) in self.entries.iter_mut().zip(inputs) {
            entry.lift(*value);
        }
        Ok(())
    }

    /// Fails unless `other` holds the same aggregates in the same order.
    pub fn ensure_compatible(&self, other: &Accumulator) -> Result<()> {
        if other.entries.len() != self.entries.len() {
            return Err(WindowError::IncompatibleState(format!(
                "accumulator sizes differ: {} vs {}",
                self.entries.len(),
                other.entries.len()
            )));
        }
        match self
            .entries
            .iter()
            .zip(&other.entries)
            .find(|(a, b)| a.kind() != b.kind())
        {
            Some((a, b)) => Err(WindowError::IncompatibleState(format!(
                "cannot combine {} with {}",
                a.kind(),
                b.kind()
            ))),
            None => Ok(()),
        }
    }

    /// Leaves `self` untouched when the shapes differ.
    pub fn combine(&mut self, other: &Accumulator) -> Result<()> {
        self.ensure_compatible(other)?;
        for (a, b) in self.entries.iter_mut().zip(&other.entries) {
            a.combine(b)?;
        }
        Ok(())
    }

    pub fn lower(&self) -> Vec<Scalar> {
        self.entries.iter().map(PartialAggregate::lower).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggs() -> Vec<Aggregation> {
        vec![
            Aggregation::Count,
            Aggregation::Sum("v".into()),
            Aggregation::Avg("v".into()),
            Aggregation::Min("v".into()),
            Aggregation::Max("v".into()),
        ]
    }

    #[test]
    fn lift_then_lower() {
        let mut acc = Accumulator::new(&aggs());
        for v in [3.0, 1.0, 2.0] {
            acc.lift(&[Some(v); 5]).expect("lift");
        }
        acc.lift(&[None; 5]).expect("lift null");
        assert_eq!(
            acc.lower(),
            vec![
                Scalar::I64(4),
                Scalar::F64(6.0),
                Scalar::F64(2.0),
                Scalar::F64(1.0),
                Scalar::F64(3.0)
            ]
        );
    }

    #[test]
    fn empty_accumulator_lowers_to_identities() {
        let acc = Accumulator::new(&aggs());
        assert_eq!(
            acc.lower(),
            vec![
                Scalar::I64(0),
                Scalar::F64(0.0),
                Scalar::Null,
                Scalar::Null,
                Scalar::Null
            ]
        );
    }

    #[test]
    fn combine_matches_single_fold() {
        let mut left = Accumulator::new(&aggs());
        let mut right = Accumulator::new(&aggs());
        let mut whole = Accumulator::new(&aggs());
        for (i, v) in [5.0, -1.0, 7.5, 2.0].into_iter().enumerate() {
            let target = if i % 2 == 0 { &mut left } else { &mut right };
            target.lift(&[Some(v); 5]).expect("lift");
            whole.lift(&[Some(v); 5]).expect("lift");
        }
        left.combine(&right).expect("combine");
        assert_eq!(left, whole);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let mut a = Accumulator::new(&[Aggregation::Count]);
        let b = Accumulator::new(&[Aggregation::Sum("v".into())]);
        assert!(matches!(a.combine(&b), Err(WindowError::IncompatibleState(_))));
        let c = Accumulator::new(&aggs());
        assert!(a.combine(&c).is_err());

        let mut lifted = Accumulator::new(&[Aggregation::Count, Aggregation::Count]);
        lifted.lift(&[None, None]).expect("lift");
        let mut other = Accumulator::new(&[Aggregation::Count, Aggregation::Sum("v".into())]);
        other.lift(&[None, Some(2.0)]).expect("lift");
        let before = lifted.clone();
        assert!(lifted.combine(&other).is_err());
        assert_eq!(lifted, before);
        assert!(a.lift(&[Some(1.0), Some(2.0)]).is_err());
    }

    #[test]
    fn aggregation_parses_from_json() {
        let a: Aggregation = serde_json::from_str(r#"{"sum": "value"}"#).expect("parse");
        assert_eq!(a, Aggregation::Sum("value".into()));
        let c: Aggregation = serde_json::from_str(r#""count""#).expect("parse");
        assert_eq!(c, Aggregation::Count);
        assert_eq!(a.default_alias(), "sum_value");
    }
}
