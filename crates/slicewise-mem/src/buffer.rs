//! Pooled record buffers handed from the producer to worker threads.

use slicewise_core::id::OriginId;
use slicewise_core::types::RowBatch;

use crate::pool::PoolSlot;

/// A decoded record batch plus the upstream bookkeeping the window operator
/// needs: which origin produced it, that origin's per-buffer sequence number,
/// and the origin's watermark after this buffer.
///
/// The buffer occupies one pool slot until it is dropped.
#[derive(Debug)]
pub struct TupleBuffer {
    batch: RowBatch,
    origin: OriginId,
    sequence_number: u64,
    watermark: u64,
    _slot: PoolSlot,
}

impl TupleBuffer {
    pub(crate) fn new(
        batch: RowBatch,
        origin: OriginId,
        sequence_number: u64,
        watermark: u64,
        slot: PoolSlot,
    ) -> Self {
        Self {
            batch,
            origin,
            sequence_number,
            watermark,
            _slot: slot,
        }
    }

    pub fn batch(&self) -> &RowBatch {
        &self.batch
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}
