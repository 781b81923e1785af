//! Per-worker slice storage.
//!
//! A store is owned by exactly one worker between `open` and `close` and is
//! never shared, so nothing in here synchronizes.

use std::collections::VecDeque;

use slicewise_core::id::WorkerId;

use crate::assigner::{TimeRange, WindowAssigner};
use crate::error::{Result, WindowError};
use crate::slice::{Slice, StateLayout};

#[derive(Debug)]
pub struct ThreadLocalSliceStore {
    worker: WorkerId,
    assigner: WindowAssigner,
    layout: StateLayout,
    // Ascending by start, non-overlapping.
    slices: VecDeque<Slice>,
    // Slices ending at or before this point have been handed over.
    last_watermark: u64,
}

impl ThreadLocalSliceStore {
    pub fn new(worker: WorkerId, assigner: WindowAssigner, layout: StateLayout) -> Self {
        Self {
            worker,
            assigner,
            layout,
            slices: VecDeque::new(),
            last_watermark: 0,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// The slice containing `ts`, created (and inserted in order) if absent.
    pub fn find_or_create_slice_by_ts(&mut self, ts: u64) -> Result<&mut Slice> {
        if ts < self.last_watermark {
            return Err(WindowError::LateRecord {
                ts,
                watermark: self.last_watermark,
            });
        }
        // In-order streams hit the newest slice.
        let newest = self
            .slices
            .back()
            .is_some_and(|last| last.range().contains(ts));
        let idx = if newest {
            self.slices.len() - 1
        } else {
            self.locate_or_insert(ts)
        };
        Ok(&mut self.slices[idx])
    }

    fn locate_or_insert(&mut self, ts: u64) -> usize {
        let pos = self.slices.partition_point(|s| s.end() <= ts);
        if let Some(s) = self.slices.get(pos) {
            if s.range().contains(ts) {
                return pos;
            }
        }
        let bounds = self.assigner.slice_bounds(ts);
        let slice = self.allocate_new_slice(bounds.start, bounds.end);
        self.slices.insert(pos, slice);
        pos
    }

    /// An empty slice for `[start, end)` with this store's state layout.
    pub fn allocate_new_slice(&self, start: u64, end: u64) -> Slice {
        Slice::new(TimeRange::new(start, end), self.layout.empty_state())
    }

    /// Drop slices with `end <= ts`. Returns how many were removed.
    pub fn remove_slices_older_than(&mut self, ts: u64) -> usize {
        let mut removed = 0;
        while self.slices.front().is_some_and(|s| s.end() <= ts) {
            self.slices.pop_front();
            removed += 1;
        }
        removed
    }

    /// Move out slices with `end <= ts`, oldest first.
    pub fn drain_slices_until(&mut self, ts: u64) -> Vec<Slice> {
        let n = self.slices.partition_point(|s| s.end() <= ts);
        self.slices.drain(..n).collect()
    }

    /// Move out every open slice.
    pub fn drain_all(&mut self) -> Vec<Slice> {
        self.slices.drain(..).collect()
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn last_watermark(&self) -> u64 {
        self.last_watermark
    }

    /// Raise the store's watermark; it never moves backwards.
    pub fn set_last_watermark(&mut self, ts: u64) {
        self.last_watermark = self.last_watermark.max(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use slicewise_core::measure::WindowMeasure;

    fn store(size: u64, slide: u64) -> ThreadLocalSliceStore {
        let assigner = WindowAssigner::new(
            WindowMeasure::milliseconds(size),
            WindowMeasure::milliseconds(slide),
        )
        .expect("assigner");
        ThreadLocalSliceStore::new(
            WorkerId::new(0),
            assigner,
            StateLayout::new(vec![Aggregation::Count], false),
        )
    }

    fn fill(store: &mut ThreadLocalSliceStore) {
        for ts in (1..1000).step_by(10) {
            store
                .find_or_create_slice_by_ts(ts)
                .expect("slice")
                .update(None, &[None], &StateLayout::new(vec![Aggregation::Count], false))
                .expect("update");
        }
    }

    #[test]
    fn sliding_store_creates_one_slice_per_edge_gap() {
        let mut s = store(100, 10);
        fill(&mut s);
        assert_eq!(s.len(), 100);
        assert_eq!(s.remove_slices_older_than(500), 50);
        assert_eq!(s.len(), 50);
    }

    #[test]
    fn uneven_slide_store() {
        let mut s = store(100, 30);
        fill(&mut s);
        assert_eq!(s.len(), 64);
    }

    #[test]
    fn tumbling_store_and_full_removal() {
        let mut s = store(100, 100);
        fill(&mut s);
        assert_eq!(s.len(), 10);
        assert_eq!(s.remove_slices_older_than(1000), 10);
        assert!(s.is_empty());
    }

    #[test]
    fn out_of_order_records_keep_slices_sorted() {
        let mut s = store(100, 100);
        for ts in [450, 120, 999, 130, 5] {
            s.find_or_create_slice_by_ts(ts).expect("slice");
        }
        let starts: Vec<u64> = s.slices().map(|sl| sl.start()).collect();
        assert_eq!(starts, vec![0, 100, 400, 900]);
    }

    #[test]
    fn records_behind_the_watermark_are_rejected() {
        let mut s = store(100, 100);
        s.find_or_create_slice_by_ts(150).expect("slice");
        let drained = s.drain_slices_until(200);
        assert_eq!(drained.len(), 1);
        s.set_last_watermark(200);
        s.set_last_watermark(100);
        assert_eq!(s.last_watermark(), 200);
        assert!(matches!(
            s.find_or_create_slice_by_ts(199),
            Err(WindowError::LateRecord { ts: 199, watermark: 200 })
        ));
        assert!(s.find_or_create_slice_by_ts(200).is_ok());
    }
}
