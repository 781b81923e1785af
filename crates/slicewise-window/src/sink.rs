//! Downstream emission of fired windows.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use slicewise_core::types::{Column, RowBatch, Scalar};
use thiserror::Error;

use crate::slice::ResultRow;

/// `{sequenceNumber, windowStart, windowEnd}` of a fired window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowTriggerTask {
    pub sequence_number: u64,
    pub window_start: u64,
    pub window_end: u64,
}

/// A fired window and its aggregate rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowResult {
    pub task: WindowTriggerTask,
    /// Records folded into the window.
    pub records: u64,
    pub rows: Vec<ResultRow>,
}

impl WindowResult {
    /// Columns `window_start, window_end, sequence_number, [key], <aliases>`.
    pub fn to_row_batch(&self, key_name: Option<&str>, aliases: &[String]) -> RowBatch {
        let n = self.rows.len();
        let mut columns = vec![
            Column::new("window_start", vec![Scalar::U64(self.task.window_start); n]),
            Column::new("window_end", vec![Scalar::U64(self.task.window_end); n]),
            Column::new(
                "sequence_number",
                vec![Scalar::U64(self.task.sequence_number); n],
            ),
        ];
        if let Some(name) = key_name {
            columns.push(Column::new(
                name,
                self.rows
                    .iter()
                    .map(|r| r.key.as_ref().map_or(Scalar::Null, |k| k.to_scalar()))
                    .collect(),
            ));
        }
        for (i, alias) in aliases.iter().enumerate() {
            columns.push(Column::new(
                alias.clone(),
                self.rows
                    .iter()
                    .map(|r| r.values.get(i).cloned().unwrap_or(Scalar::Null))
                    .collect(),
            ));
        }
        RowBatch::new(columns)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Receives fired windows in sequence order. Returning `Ok` acknowledges the
/// window; after that its slices may be collected.
pub trait WindowSink: Send + Sync {
    fn emit(&self, result: WindowResult) -> Result<(), SinkError>;
}

/// Keeps every emitted window in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<WindowResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far, in emission order.
    pub fn results(&self) -> Vec<WindowResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<WindowResult> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl WindowSink for CollectingSink {
    fn emit(&self, result: WindowResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
        Ok(())
    }
}
