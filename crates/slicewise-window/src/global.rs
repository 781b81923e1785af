//! Global slice store: merged slices waiting for their windows to fire.
//!
//! Staging rounds may finish merging on different workers in any order. The
//! store parks early rounds and applies them strictly by round number, so
//! windows are evaluated in ascending end order and sequence numbers are
//! handed out without gaps. Emission happens under the store's lock, which
//! gives the sink exclusive, ordered access.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use crate::action::ActionDescriptor;
use crate::assigner::TimeRange;
use crate::error::{Result, WindowError};
use crate::manager::WindowManager;
use crate::metrics::OperatorMetrics;
use crate::sink::{WindowResult, WindowSink, WindowTriggerTask};
use crate::slice::{Slice, StateLayout};
use crate::trigger::{CandidateWindow, TriggerDecision, WindowTrigger};

/// First sequence number handed to a fired window.
pub const FIRST_WINDOW_SEQUENCE: u64 = 1;

#[derive(Debug)]
struct ParkedRound {
    frontier: u64,
    slices: Vec<Slice>,
}

#[derive(Debug)]
struct GlobalState {
    next_round: u64,
    parked: BTreeMap<u64, ParkedRound>,
    // Merged slices keyed by start.
    slices: BTreeMap<u64, Slice>,
    frontier: u64,
    // Windows ending at or before this point have been queued as candidates.
    enumerated_until: u64,
    pending: VecDeque<TimeRange>,
    next_sequence: u64,
    extent: Option<TimeRange>,
}

pub struct GlobalSliceStore {
    manager: Arc<WindowManager>,
    trigger: WindowTrigger,
    action: ActionDescriptor,
    layout: StateLayout,
    sink: Arc<dyn WindowSink>,
    metrics: Arc<OperatorMetrics>,
    state: Mutex<GlobalState>,
}

impl GlobalSliceStore {
    pub fn new(
        manager: Arc<WindowManager>,
        trigger: WindowTrigger,
        action: ActionDescriptor,
        layout: StateLayout,
        sink: Arc<dyn WindowSink>,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            manager,
            trigger,
            action,
            layout,
            sink,
            metrics,
            state: Mutex::new(GlobalState {
                next_round: 0,
                parked: BTreeMap::new(),
                slices: BTreeMap::new(),
                frontier: 0,
                enumerated_until: 0,
                pending: VecDeque::new(),
                next_sequence: FIRST_WINDOW_SEQUENCE,
                extent: None,
            }),
        }
    }

    /// Add the merged slices of staging round `round` and fire every window
    /// the advanced frontier closes. Returns the windows emitted by this call.
    pub fn add_slices_and_trigger_windows(
        &self,
        round: u64,
        frontier: u64,
        merged: Vec<Slice>,
    ) -> Result<Vec<WindowTriggerTask>> {
        let mut st = self.lock();
        if round < st.next_round || st.parked.contains_key(&round) {
            return Err(WindowError::Invariant(format!(
                "staging round {round} delivered twice"
            )));
        }
        st.parked.insert(
            round,
            ParkedRound {
                frontier,
                slices: merged,
            },
        );
        let mut applied = false;
        loop {
            let next = st.next_round;
            let Some(ready) = st.parked.remove(&next) else {
                break;
            };
            Self::apply_round(&mut st, ready)?;
            st.next_round += 1;
            applied = true;
        }
        if !applied {
            trace!(round, waiting_for = st.next_round, "staging round parked");
            return Ok(Vec::new());
        }
        self.trigger_windows(&mut st)
    }

    /// Fire every window that still has data, regardless of watermark.
    /// Used when the operator stops with the flush policy.
    pub fn trigger_all_inflight_windows(&self) -> Result<Vec<WindowTriggerTask>> {
        let mut st = self.lock();
        let parked = std::mem::take(&mut st.parked);
        for (round, ready) in parked {
            Self::apply_round(&mut st, ready)?;
            st.next_round = round + 1;
        }
        st.frontier = u64::MAX;
        self.trigger_windows(&mut st)
    }

    fn apply_round(st: &mut GlobalState, round: ParkedRound) -> Result<()> {
        for slice in round.slices {
            let range = slice.range();
            st.extent = Some(match st.extent {
                None => range,
                Some(e) => TimeRange::new(e.start.min(range.start), e.end.max(range.end)),
            });
            if st.slices.insert(range.start, slice).is_some() {
                return Err(WindowError::Invariant(format!(
                    "slice {range} merged twice"
                )));
            }
        }
        st.frontier = st.frontier.max(round.frontier);
        Ok(())
    }

    fn enumerate_candidates(&self, st: &mut GlobalState) {
        let Some(extent) = st.extent else {
            return;
        };
        let size = self.manager.assigner().size();
        let lo = st.enumerated_until.max(extent.start);
        // Windows ending at or after `extent.end + size` hold no data.
        let hi = st.frontier.min(extent.end.saturating_add(size - 1));
        if hi <= lo {
            return;
        }
        st.pending
            .extend(self.manager.assigner().windows_ending_in(lo, hi));
        st.enumerated_until = hi;
    }

    fn trigger_windows(&self, st: &mut GlobalState) -> Result<Vec<WindowTriggerTask>> {
        self.enumerate_candidates(st);
        let watermark = self.manager.watermark_for_closing(st.frontier);
        let mut emitted = Vec::new();

        while let Some(window) = st.pending.front().copied() {
            let records = st
                .slices
                .range(window.start..window.end)
                .map(|(_, s)| s.records())
                .sum();
            let candidate = CandidateWindow {
                range: window,
                records,
            };
            match self.trigger.evaluate(watermark, &candidate) {
                TriggerDecision::Wait => break,
                TriggerDecision::Expire => {
                    st.pending.pop_front();
                    self.metrics.window_expired();
                    trace!(start = window.start, end = window.end, "empty window expired");
                }
                TriggerDecision::Fire => {
                    let composed = self.action.compose_window(
                        window,
                        st.slices.range(window.start..window.end).map(|(_, s)| s),
                        &self.layout,
                    )?;
                    let task = WindowTriggerTask {
                        sequence_number: st.next_sequence,
                        window_start: window.start,
                        window_end: window.end,
                    };
                    let result = WindowResult {
                        task,
                        records: composed.records(),
                        rows: composed.rows(),
                    };
                    if let Err(e) = self.sink.emit(result) {
                        warn!(
                            sequence_number = task.sequence_number,
                            start = window.start,
                            end = window.end,
                            error = %e,
                            "window emission failed; window stays pending"
                        );
                        return Err(WindowError::Emit {
                            start: window.start,
                            end: window.end,
                            reason: e.to_string(),
                        });
                    }
                    st.next_sequence += 1;
                    st.pending.pop_front();
                    self.metrics.window_emitted();
                    emitted.push(task);
                }
            }
        }

        self.collect_garbage(st);
        if !emitted.is_empty() {
            debug!(
                windows = emitted.len(),
                frontier = st.frontier,
                retained_slices = st.slices.len(),
                "windows triggered"
            );
        }
        Ok(emitted)
    }

    fn collect_garbage(&self, st: &mut GlobalState) {
        let assigner = self.manager.assigner();
        let keep_from = match st.pending.front() {
            Some(w) => w.start,
            None => assigner
                .first_window_end_after(st.enumerated_until)
                .saturating_sub(assigner.size()),
        };
        // Slices never straddle a window start, so everything below it is done.
        let kept = st.slices.split_off(&keep_from);
        st.slices = kept;
    }

    /// Drop every slice and pending window. Returns how many slices were dropped.
    pub fn discard(&self) -> usize {
        let mut st = self.lock();
        let dropped = st.slices.len()
            + st
                .parked
                .values()
                .map(|r| r.slices.len())
                .sum::<usize>();
        st.slices.clear();
        st.parked.clear();
        st.pending.clear();
        dropped
    }

    /// Merged slices still held.
    pub fn retained_slices(&self) -> usize {
        self.lock().slices.len()
    }

    /// Candidate windows not yet fired or expired.
    pub fn pending_windows(&self) -> usize {
        self.lock().pending.len()
    }

    /// The sequence number the next fired window will get.
    pub fn next_sequence_number(&self) -> u64 {
        self.lock().next_sequence
    }

    pub fn frontier(&self) -> u64 {
        self.lock().frontier
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GlobalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for GlobalSliceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalSliceStore")
            .field("action", &self.action)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use crate::assigner::WindowAssigner;
    use crate::sink::{CollectingSink, SinkError};
    use crate::trigger::TriggerPolicy;
    use slicewise_core::id::OperatorId;
    use slicewise_core::measure::WindowMeasure;
    use slicewise_core::types::Scalar;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn layout() -> StateLayout {
        StateLayout::new(vec![Aggregation::Sum("v".into())], false)
    }

    fn make_store(
        size: u64,
        slide: u64,
        emit_empty: bool,
        sink: Arc<dyn WindowSink>,
    ) -> (GlobalSliceStore, Arc<OperatorMetrics>) {
        let assigner = WindowAssigner::new(
            WindowMeasure::milliseconds(size),
            WindowMeasure::milliseconds(slide),
        )
        .expect("assigner");
        let manager = Arc::new(WindowManager::new(
            OperatorId::new(1),
            assigner,
            WindowMeasure::ZERO,
        ));
        let metrics = Arc::new(OperatorMetrics::default());
        let store = GlobalSliceStore::new(
            manager,
            WindowTrigger::new(TriggerPolicy::OnWatermarkChange, 0, emit_empty),
            ActionDescriptor::default_for(&assigner),
            layout(),
            sink,
            Arc::clone(&metrics),
        );
        (store, metrics)
    }

    fn slice(start: u64, end: u64, values: &[f64]) -> Slice {
        let l = layout();
        let mut s = Slice::new(TimeRange::new(start, end), l.empty_state());
        for v in values {
            s.update(None, &[Some(*v)], &l).expect("update");
        }
        s
    }

    fn sums(sink: &CollectingSink) -> Vec<(u64, u64, u64, Scalar)> {
        sink.results()
            .into_iter()
            .map(|r| {
                (
                    r.task.sequence_number,
                    r.task.window_start,
                    r.task.window_end,
                    r.rows[0].values[0].clone(),
                )
            })
            .collect()
    }

    #[test]
    fn sliding_windows_fire_in_order_as_frontier_advances() {
        let sink = Arc::new(CollectingSink::new());
        let (store, _) = make_store(1000, 500, false, sink.clone());
        store
            .add_slices_and_trigger_windows(
                0,
                1000,
                vec![slice(0, 500, &[1.0]), slice(500, 1000, &[1.0])],
            )
            .expect("round 0");
        store
            .add_slices_and_trigger_windows(1, 1500, vec![slice(1000, 1500, &[1.0])])
            .expect("round 1");
        store
            .add_slices_and_trigger_windows(2, 2000, vec![])
            .expect("round 2");
        assert_eq!(
            sums(&sink),
            vec![
                (1, 0, 1000, Scalar::F64(2.0)),
                (2, 500, 1500, Scalar::F64(2.0)),
                (3, 1000, 2000, Scalar::F64(1.0)),
            ]
        );
        assert_eq!(store.retained_slices(), 0);
    }

    #[test]
    fn early_rounds_wait_for_their_predecessors() {
        let sink = Arc::new(CollectingSink::new());
        let (store, _) = make_store(100, 100, false, sink.clone());
        let fired = store
            .add_slices_and_trigger_windows(1, 200, vec![slice(100, 200, &[5.0])])
            .expect("round 1");
        assert!(fired.is_empty());
        let fired = store
            .add_slices_and_trigger_windows(0, 100, vec![slice(0, 100, &[3.0])])
            .expect("round 0");
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].window_end, 100);
        assert_eq!(fired[1].sequence_number, 2);
        assert!(store
            .add_slices_and_trigger_windows(0, 100, vec![])
            .is_err());
    }

    #[test]
    fn empty_windows_expire_or_emit_identity() {
        let sink = Arc::new(CollectingSink::new());
        let (store, metrics) = make_store(100, 100, false, sink.clone());
        store
            .add_slices_and_trigger_windows(
                0,
                400,
                vec![slice(0, 100, &[1.0]), slice(300, 400, &[1.0])],
            )
            .expect("round");
        assert_eq!(sink.results().len(), 2);
        assert_eq!(metrics.snapshot().windows_expired, 2);

        let sink = Arc::new(CollectingSink::new());
        let (store, _) = make_store(100, 100, true, sink.clone());
        store
            .add_slices_and_trigger_windows(
                0,
                400,
                vec![slice(0, 100, &[1.0]), slice(300, 400, &[1.0])],
            )
            .expect("round");
        let results = sink.results();
        assert_eq!(results.len(), 4);
        assert_eq!(results[1].records, 0);
        assert_eq!(results[1].rows[0].values[0], Scalar::F64(0.0));
    }

    struct FlakySink {
        fail: AtomicBool,
        inner: CollectingSink,
    }

    impl WindowSink for FlakySink {
        fn emit(&self, result: WindowResult) -> std::result::Result<(), SinkError> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(SinkError("downstream unavailable".into()));
            }
            self.inner.emit(result)
        }
    }

    #[test]
    fn failed_emission_keeps_window_and_sequence_number() {
        let sink = Arc::new(FlakySink {
            fail: AtomicBool::new(true),
            inner: CollectingSink::new(),
        });
        let (store, _) = make_store(100, 100, false, sink.clone());
        let err = store
            .add_slices_and_trigger_windows(0, 100, vec![slice(0, 100, &[2.0])])
            .expect_err("sink fails once");
        assert!(matches!(err, WindowError::Emit { start: 0, end: 100, .. }));
        assert!(!err.is_fatal());
        assert_eq!(store.pending_windows(), 1);
        assert_eq!(store.next_sequence_number(), 1);

        let fired = store.trigger_all_inflight_windows().expect("retry");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].sequence_number, 1);
        assert_eq!(sink.inner.results().len(), 1);
    }

    #[test]
    fn flush_fires_windows_beyond_the_frontier() {
        let sink = Arc::new(CollectingSink::new());
        let (store, _) = make_store(1000, 500, false, sink.clone());
        store
            .add_slices_and_trigger_windows(0, 500, vec![slice(0, 500, &[1.0])])
            .expect("round");
        assert!(sink.results().is_empty());
        let fired = store.trigger_all_inflight_windows().expect("flush");
        let ends: Vec<u64> = fired.iter().map(|t| t.window_end).collect();
        assert_eq!(ends, vec![1000]);
        assert_eq!(store.discard(), 0);
    }
}
