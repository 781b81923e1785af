//! Multi-origin watermark tracking.
//!
//! Every upstream origin numbers its buffers and stamps each with the origin's
//! watermark. Buffers of one origin may be executed by different workers in any
//! order, so per-origin watermarks are applied strictly in sequence-number
//! order; a buffer that arrives early waits in a small reorder map until the
//! gap before it is filled. The global watermark is the minimum over origins.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use slicewise_core::id::OriginId;
use tracing::warn;

use crate::error::{Result, WindowError};

/// First sequence number every origin starts with.
pub const FIRST_SEQUENCE_NUMBER: u64 = 1;

#[derive(Debug)]
struct OriginSequence {
    next: u64,
    applied: u64,
    parked: BTreeMap<u64, u64>,
}

#[derive(Debug)]
struct OriginState {
    id: OriginId,
    current: AtomicU64,
    sequence: Mutex<OriginSequence>,
}

#[derive(Debug)]
pub struct MultiOriginWatermarkProcessor {
    origins: Vec<OriginState>,
    index: HashMap<OriginId, usize>,
}

impl MultiOriginWatermarkProcessor {
    pub fn new(origins: &[OriginId]) -> Result<Self> {
        if origins.is_empty() {
            return Err(WindowError::Config(
                "watermark processor needs at least one origin".into(),
            ));
        }
        let mut index = HashMap::with_capacity(origins.len());
        let mut states = Vec::with_capacity(origins.len());
        for &id in origins {
            if index.insert(id, states.len()).is_some() {
                return Err(WindowError::Config(format!("{id} registered twice")));
            }
            states.push(OriginState {
                id,
                current: AtomicU64::new(0),
                sequence: Mutex::new(OriginSequence {
                    next: FIRST_SEQUENCE_NUMBER,
                    applied: 0,
                    parked: BTreeMap::new(),
                }),
            });
        }
        Ok(Self {
            origins: states,
            index,
        })
    }

    /// Record that `origin`'s buffer `sequence_number` carried `watermark`.
    /// Returns the global watermark afterwards.
    pub fn update_watermark(
        &self,
        origin: OriginId,
        sequence_number: u64,
        watermark: u64,
    ) -> Result<u64> {
        let idx = *self
            .index
            .get(&origin)
            .ok_or(WindowError::UnknownOrigin(origin))?;
        let state = &self.origins[idx];
        {
            let mut seq = state.sequence.lock().unwrap_or_else(PoisonError::into_inner);
            if sequence_number < seq.next || seq.parked.contains_key(&sequence_number) {
                warn!(
                    origin = origin.get(),
                    sequence_number, "duplicate watermark update ignored"
                );
                return Ok(self.current());
            }
            seq.parked.insert(sequence_number, watermark);
            loop {
                let next = seq.next;
                let Some(wm) = seq.parked.remove(&next) else {
                    break;
                };
                if wm < seq.applied {
                    return Err(WindowError::WatermarkRegression {
                        origin: state.id,
                        previous: seq.applied,
                        next: wm,
                    });
                }
                seq.applied = wm;
                seq.next += 1;
            }
            state.current.store(seq.applied, Ordering::Release);
        }
        Ok(self.current())
    }

    /// Global watermark: the minimum over all origins.
    pub fn current(&self) -> u64 {
        self.origins
            .iter()
            .map(|o| o.current.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Watermark of a single origin, if registered.
    pub fn origin_watermark(&self, origin: OriginId) -> Option<u64> {
        self.index
            .get(&origin)
            .map(|&i| self.origins[i].current.load(Ordering::Acquire))
    }

    pub fn num_origins(&self) -> usize {
        self.origins.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins(n: u64) -> Vec<OriginId> {
        (0..n).map(OriginId::new).collect()
    }

    #[test]
    fn global_is_minimum_over_origins() {
        let p = MultiOriginWatermarkProcessor::new(&origins(2)).expect("processor");
        assert_eq!(p.update_watermark(OriginId::new(0), 1, 500).expect("update"), 0);
        assert_eq!(p.update_watermark(OriginId::new(1), 1, 300).expect("update"), 300);
        assert_eq!(p.update_watermark(OriginId::new(1), 2, 900).expect("update"), 500);
    }

    #[test]
    fn out_of_order_sequence_numbers_wait_for_the_gap() {
        let p = MultiOriginWatermarkProcessor::new(&origins(1)).expect("processor");
        let o = OriginId::new(0);
        assert_eq!(p.update_watermark(o, 2, 200).expect("update"), 0);
        assert_eq!(p.update_watermark(o, 3, 300).expect("update"), 0);
        assert_eq!(p.update_watermark(o, 1, 100).expect("update"), 300);
        // Redelivery of an applied buffer changes nothing.
        assert_eq!(p.update_watermark(o, 2, 200).expect("update"), 300);
    }

    #[test]
    fn regression_within_an_origin_is_fatal() {
        let p = MultiOriginWatermarkProcessor::new(&origins(1)).expect("processor");
        let o = OriginId::new(0);
        p.update_watermark(o, 1, 500).expect("update");
        let err = p.update_watermark(o, 2, 400).expect_err("regression");
        assert!(matches!(
            err,
            WindowError::WatermarkRegression { previous: 500, next: 400, .. }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_and_duplicate_origins() {
        let p = MultiOriginWatermarkProcessor::new(&origins(1)).expect("processor");
        assert!(matches!(
            p.update_watermark(OriginId::new(9), 1, 1),
            Err(WindowError::UnknownOrigin(_))
        ));
        assert!(MultiOriginWatermarkProcessor::new(&[OriginId::new(1), OriginId::new(1)]).is_err());
        assert!(MultiOriginWatermarkProcessor::new(&[]).is_err());
    }
}
