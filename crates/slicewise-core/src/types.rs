//! Lightweight value/column types for record batches.
//!
//! Batches are columnar: every column carries the same number of values.
//! Upstream decoders build them; the window operator only reads them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Utf8,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I32(_) => DataType::Int32,
            Scalar::I64(_) => DataType::Int64,
            Scalar::U64(_) => DataType::UInt64,
            Scalar::F32(_) => DataType::Float32,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view used by aggregate inputs. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::U64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Event-time view: non-negative integers only.
    pub fn as_timestamp(&self) -> Option<u64> {
        match self {
            Scalar::I32(v) => u64::try_from(*v).ok(),
            Scalar::I64(v) => u64::try_from(*v).ok(),
            Scalar::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Plain JSON rendering (no enum tagging), used for result output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::I32(v) => Value::from(*v),
            Scalar::I64(v) => Value::from(*v),
            Scalar::U64(v) => Value::from(*v),
            Scalar::F32(v) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::F64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Bin(b) => Value::from(b.clone()),
        }
    }
}

/// Hashable, totally ordered grouping key derived from a [`Scalar`].
///
/// Floats are keyed by their bit pattern, so `0.0` and `-0.0` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    FloatBits(u64),
    Str(String),
    Bin(Vec<u8>),
}

impl KeyValue {
    pub fn to_scalar(&self) -> Scalar {
        match self {
            KeyValue::Null => Scalar::Null,
            KeyValue::Bool(b) => Scalar::Bool(*b),
            KeyValue::Int(v) => Scalar::I64(*v),
            KeyValue::UInt(v) => Scalar::U64(*v),
            KeyValue::FloatBits(bits) => Scalar::F64(f64::from_bits(*bits)),
            KeyValue::Str(s) => Scalar::Str(s.clone()),
            KeyValue::Bin(b) => Scalar::Bin(b.clone()),
        }
    }
}

impl From<&Scalar> for KeyValue {
    fn from(s: &Scalar) -> Self {
        match s {
            Scalar::Null => KeyValue::Null,
            Scalar::Bool(b) => KeyValue::Bool(*b),
            Scalar::I32(v) => KeyValue::Int(*v as i64),
            Scalar::I64(v) => KeyValue::Int(*v),
            Scalar::U64(v) => KeyValue::UInt(*v),
            Scalar::F32(v) => KeyValue::FloatBits((*v as f64).to_bits()),
            Scalar::F64(v) => KeyValue::FloatBits(v.to_bits()),
            Scalar::Str(s) => KeyValue::Str(s.clone()),
            Scalar::Bin(b) => KeyValue::Bin(b.clone()),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Str(s.to_string())
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Columnar batch of records with a fixed schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Column>,
}

impl RowBatch {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check that every column has the same length.
    pub fn validate(&self) -> Result<()> {
        let rows = self.num_rows();
        for c in &self.columns {
            if c.len() != rows {
                return Err(Error::Schema(format!(
                    "column '{}' has {} values, expected {rows}",
                    c.name,
                    c.len()
                )));
            }
        }
        Ok(())
    }

    /// Schema inferred from the first non-null value of each column.
    pub fn infer_schema(&self) -> Schema {
        let fields = self
            .columns
            .iter()
            .map(|c| {
                let dt = c
                    .values
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Scalar::data_type)
                    .unwrap_or(DataType::Utf8);
                let nullable = c.values.iter().any(Scalar::is_null);
                Field::new(c.name.clone(), dt, nullable)
            })
            .collect();
        Schema::new(fields)
    }

    /// Rough in-memory footprint, used to pick buffer slot sizes.
    pub fn approx_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| {
                c.name.len()
                    + c.values
                        .iter()
                        .map(|v| match v {
                            Scalar::Str(s) => std::mem::size_of::<Scalar>() + s.len(),
                            Scalar::Bin(b) => std::mem::size_of::<Scalar>() + b.len(),
                            _ => std::mem::size_of::<Scalar>(),
                        })
                        .sum::<usize>()
            })
            .sum()
    }
}
