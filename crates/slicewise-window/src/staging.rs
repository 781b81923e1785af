//! Hand-off area between thread-local stores and the global slice store.
//!
//! Workers deposit slices whose range they have closed, then report how far
//! they have closed. A range is ready to merge once every worker has reported
//! past its end; at that point no worker can still produce a slice for it.
//!
//! Deposits touch only the shard of the range they go to. Frontier updates
//! take one small lock and, when the minimum moves, cut a [`StagingRound`]
//! holding the ready ranges as merge tasks. The worker that cut the round runs
//! the merges, outside of any lock.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use slicewise_core::id::WorkerId;
use tracing::{debug, trace};

use crate::assigner::TimeRange;
use crate::error::{Result, WindowError};
use crate::slice::Slice;

/// All per-worker slices of one range, ready to fold.
#[derive(Debug)]
pub struct SliceMergeTask {
    pub sequence_number: u64,
    pub start_slice: u64,
    pub end_slice: u64,
    pub slices: Vec<Slice>,
}

impl SliceMergeTask {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_slice, self.end_slice)
    }
}

/// Merge tasks released by one advance of the staging frontier.
#[derive(Debug)]
pub struct StagingRound {
    /// Dense, starting at 0; the global store applies rounds in this order.
    pub round: u64,
    /// Every range ending at or before this point has been released.
    pub frontier: u64,
    /// Ascending by range end.
    pub tasks: Vec<SliceMergeTask>,
}

#[derive(Debug)]
struct StagedRange {
    range: TimeRange,
    slices: Vec<Slice>,
}

#[derive(Debug)]
struct Frontier {
    handed: Vec<u64>,
    // Closed workers no longer hold the frontier back.
    retired: Vec<bool>,
    current: u64,
    next_round: u64,
    next_task: u64,
}

impl Frontier {
    fn live_minimum(&self) -> Option<u64> {
        self.handed
            .iter()
            .zip(&self.retired)
            .filter(|(_, retired)| !**retired)
            .map(|(handed, _)| *handed)
            .min()
    }
}

#[derive(Debug)]
pub struct SliceStaging {
    ranges: DashMap<u64, StagedRange>,
    frontier: Mutex<Frontier>,
}

impl SliceStaging {
    pub fn new(num_workers: usize) -> Self {
        Self {
            ranges: DashMap::new(),
            frontier: Mutex::new(Frontier {
                handed: vec![0; num_workers],
                retired: vec![false; num_workers],
                current: 0,
                next_round: 0,
                next_task: 1,
            }),
        }
    }

    /// Deposit closed slices. Ownership moves into the staging area.
    pub fn add_slices(&self, slices: Vec<Slice>) -> Result<()> {
        for slice in slices {
            let range = slice.range();
            let mut staged = self.ranges.entry(range.end).or_insert_with(|| StagedRange {
                range,
                slices: Vec::new(),
            });
            if staged.range != range {
                return Err(WindowError::Invariant(format!(
                    "slice {range} collides with staged range {}",
                    staged.range
                )));
            }
            staged.slices.push(slice);
        }
        Ok(())
    }

    /// Record that `worker` has handed over every slice ending at or before
    /// `closed_until`. Returns the round released by this call, if any.
    pub fn advance(&self, worker: WorkerId, closed_until: u64) -> Result<Option<StagingRound>> {
        let mut f = self.frontier.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = f
            .handed
            .get_mut(worker.index())
            .ok_or(WindowError::UnknownWorker(worker))?;
        *slot = (*slot).max(closed_until);

        let min = f.live_minimum();
        Ok(self.cut_round(&mut f, min))
    }

    /// Take a closed worker out of the frontier minimum. Returns the round
    /// the remaining workers had already earned, if any. Once every worker is
    /// retired the frontier stays put until [`SliceStaging::release_until`].
    pub fn retire(&self, worker: WorkerId) -> Result<Option<StagingRound>> {
        let mut f = self.frontier.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = f
            .retired
            .get_mut(worker.index())
            .ok_or(WindowError::UnknownWorker(worker))?;
        *slot = true;
        debug!(worker = worker.get(), "worker retired from staging");
        let min = f.live_minimum();
        Ok(self.cut_round(&mut f, min))
    }

    /// Release every range ending at or before `bound`, whatever the workers
    /// reported. Only sound once no worker can deposit below `bound` anymore.
    pub fn release_until(&self, bound: u64) -> Option<StagingRound> {
        let mut f = self.frontier.lock().unwrap_or_else(PoisonError::into_inner);
        self.cut_round(&mut f, Some(bound))
    }

    fn cut_round(&self, f: &mut Frontier, min: Option<u64>) -> Option<StagingRound> {
        let min = min?;
        if min <= f.current {
            return None;
        }
        f.current = min;

        let mut ready: Vec<u64> = self
            .ranges
            .iter()
            .map(|e| *e.key())
            .filter(|end| *end <= min)
            .collect();
        ready.sort_unstable();

        let mut tasks = Vec::with_capacity(ready.len());
        for end in ready {
            if let Some((_, staged)) = self.ranges.remove(&end) {
                tasks.push(SliceMergeTask {
                    sequence_number: f.next_task,
                    start_slice: staged.range.start,
                    end_slice: staged.range.end,
                    slices: staged.slices,
                });
                f.next_task += 1;
            }
        }

        let round = f.next_round;
        f.next_round += 1;
        if tasks.is_empty() {
            trace!(round, frontier = min, "staging frontier advanced");
        } else {
            debug!(
                round,
                frontier = min,
                tasks = tasks.len(),
                "deploying slice merge tasks"
            );
        }
        Some(StagingRound {
            round,
            frontier: min,
            tasks,
        })
    }

    /// Minimum handed-over watermark across workers.
    pub fn frontier(&self) -> u64 {
        self.frontier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
    }

    /// Ranges deposited but not yet released.
    pub fn pending_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Drop everything staged. Used on hard stop and discard shutdown.
    pub fn discard_all(&self) -> usize {
        let n = self.ranges.len();
        self.ranges.clear();
        n
    }
}
