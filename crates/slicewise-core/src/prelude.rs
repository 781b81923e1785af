//! Convenient re-exports for downstream crates.

pub use crate::budget::{BudgetGuard, MemoryBudget};
pub use crate::config::{EngineConfig, ExecutionMode};
pub use crate::error::{Error, Result};
pub use crate::id::{OperatorId, OriginId, WorkerId};
pub use crate::measure::WindowMeasure;
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, KeyValue, RowBatch, Scalar};
