//! Slices: a time range plus the partial aggregate state of the records in it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use slicewise_core::types::{KeyValue, Scalar};

use crate::aggregation::{Accumulator, Aggregation};
use crate::assigner::TimeRange;
use crate::error::{Result, WindowError};

#[derive(Debug, Clone, PartialEq)]
pub enum SliceState {
    NonKeyed(Accumulator),
    Keyed(BTreeMap<KeyValue, Accumulator>),
}

impl SliceState {
    fn combine(&mut self, other: &SliceState) -> Result<()> {
        match (self, other) {
            (SliceState::NonKeyed(a), SliceState::NonKeyed(b)) => a.combine(b),
            (SliceState::Keyed(a), SliceState::Keyed(b)) => {
                // Check every shared key first so a failed merge changes nothing.
                for (key, acc) in b {
                    if let Some(existing) = a.get(key) {
                        existing.ensure_compatible(acc)?;
                    }
                }
                for (key, acc) in b {
                    match a.get_mut(key) {
                        Some(existing) => existing.combine(acc)?,
                        None => {
                            a.insert(key.clone(), acc.clone());
                        }
                    }
                }
                Ok(())
            }
            _ => Err(WindowError::IncompatibleState(
                "cannot combine keyed and non-keyed slice state".into(),
            )),
        }
    }
}

/// Factory for empty slice state; shared by every store of one operator.
#[derive(Debug, Clone)]
pub struct StateLayout {
    aggregates: Arc<[Aggregation]>,
    keyed: bool,
}

impl StateLayout {
    pub fn new(aggregates: Vec<Aggregation>, keyed: bool) -> Self {
        Self {
            aggregates: aggregates.into(),
            keyed,
        }
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    /// Number of partial aggregates per accumulator.
    pub fn entry_size(&self) -> usize {
        self.aggregates.len()
    }

    pub fn aggregates(&self) -> &[Aggregation] {
        &self.aggregates
    }

    pub fn empty_state(&self) -> SliceState {
        if self.keyed {
            SliceState::Keyed(BTreeMap::new())
        } else {
            SliceState::NonKeyed(Accumulator::new(&self.aggregates))
        }
    }

    fn empty_accumulator(&self) -> Accumulator {
        Accumulator::new(&self.aggregates)
    }
}

/// One output row of a window: optional group key followed by aggregate values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub key: Option<KeyValue>,
    pub values: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    range: TimeRange,
    state: SliceState,
    records: u64,
}

impl Slice {
    pub fn new(range: TimeRange, state: SliceState) -> Self {
        Self {
            range,
            state,
            records: 0,
        }
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn start(&self) -> u64 {
        self.range.start
    }

    pub fn end(&self) -> u64 {
        self.range.end
    }

    /// Records folded into this slice, including through merges.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn state(&self) -> &SliceState {
        &self.state
    }

    /// Fold one record into the slice.
    pub fn update(
        &mut self,
        key: Option<&KeyValue>,
        inputs: &[Option<f64>],
        layout: &StateLayout,
    ) -> Result<()> {
        match (&mut self.state, key) {
            (SliceState::NonKeyed(acc), None) => acc.lift(inputs)?,
            (SliceState::Keyed(groups), Some(k)) => match groups.get_mut(k) {
                Some(acc) => acc.lift(inputs)?,
                None => {
                    let mut acc = layout.empty_accumulator();
                    acc.lift(inputs)?;
                    groups.insert(k.clone(), acc);
                }
            },
            (SliceState::Keyed(_), None) => {
                return Err(WindowError::BufferAccess(
                    "keyed window received a record without a key".into(),
                ))
            }
            (SliceState::NonKeyed(_), Some(_)) => {
                return Err(WindowError::IncompatibleState(
                    "non-keyed slice received a keyed record".into(),
                ))
            }
        }
        self.records += 1;
        Ok(())
    }

    /// Combine `other` into this slice. `other` must lie inside this slice's range.
    pub fn absorb(&mut self, other: &Slice) -> Result<()> {
        if !self.range.covers(&other.range) {
            return Err(WindowError::Invariant(format!(
                "slice {} does not fit into {}",
                other.range, self.range
            )));
        }
        self.state.combine(&other.state)?;
        self.records += other.records;
        Ok(())
    }

    /// Lower the partial state into output rows; keyed rows come out in key order.
    pub fn rows(&self) -> Vec<ResultRow> {
        match &self.state {
            SliceState::NonKeyed(acc) => vec![ResultRow {
                key: None,
                values: acc.lower(),
            }],
            SliceState::Keyed(groups) => groups
                .iter()
                .map(|(k, acc)| ResultRow {
                    key: Some(k.clone()),
                    values: acc.lower(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(keyed: bool) -> StateLayout {
        StateLayout::new(vec![Aggregation::Sum("v".into()), Aggregation::Count], keyed)
    }

    #[test]
    fn non_keyed_slice_folds_records() {
        let l = layout(false);
        let mut s = Slice::new(TimeRange::new(0, 10), l.empty_state());
        s.update(None, &[Some(2.0), None], &l).expect("update");
        s.update(None, &[Some(3.0), None], &l).expect("update");
        assert_eq!(s.records(), 2);
        assert_eq!(s.rows()[0].values, vec![Scalar::F64(5.0), Scalar::I64(2)]);
    }

    #[test]
    fn keyed_slice_groups_and_orders_keys() {
        let l = layout(true);
        let mut s = Slice::new(TimeRange::new(0, 10), l.empty_state());
        s.update(Some(&KeyValue::from("b")), &[Some(1.0), None], &l)
            .expect("update");
        s.update(Some(&KeyValue::from("a")), &[Some(4.0), None], &l)
            .expect("update");
        s.update(Some(&KeyValue::from("b")), &[Some(1.0), None], &l)
            .expect("update");
        let rows = s.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, Some(KeyValue::from("a")));
        assert_eq!(rows[1].values, vec![Scalar::F64(2.0), Scalar::I64(2)]);
        assert!(s.update(None, &[Some(1.0), None], &l).is_err());
    }

    #[test]
    fn absorb_requires_containment_and_matching_shape() {
        let l = layout(false);
        let mut window = Slice::new(TimeRange::new(0, 20), l.empty_state());
        let mut part = Slice::new(TimeRange::new(10, 20), l.empty_state());
        part.update(None, &[Some(1.0), None], &l).expect("update");
        window.absorb(&part).expect("absorb");
        assert_eq!(window.records(), 1);

        let outside = Slice::new(TimeRange::new(20, 30), l.empty_state());
        assert!(matches!(window.absorb(&outside), Err(WindowError::Invariant(_))));

        let keyed = Slice::new(TimeRange::new(0, 10), layout(true).empty_state());
        assert!(matches!(
            window.absorb(&keyed),
            Err(WindowError::IncompatibleState(_))
        ));
    }

    #[test]
    fn failed_keyed_absorb_leaves_the_target_unchanged() {
        let l = layout(true);
        let mut window = Slice::new(TimeRange::new(0, 20), l.empty_state());
        window
            .update(Some(&KeyValue::from("a")), &[Some(1.0), None], &l)
            .expect("update");
        window
            .update(Some(&KeyValue::from("c")), &[Some(5.0), None], &l)
            .expect("update");
        let before = window.clone();

        let other_layout = StateLayout::new(
            vec![Aggregation::Sum("v".into()), Aggregation::Sum("v".into())],
            true,
        );
        let mut part = Slice::new(TimeRange::new(0, 10), other_layout.empty_state());
        part.update(Some(&KeyValue::from("b")), &[Some(2.0), Some(2.0)], &other_layout)
            .expect("update");
        part.update(Some(&KeyValue::from("c")), &[Some(3.0), Some(3.0)], &other_layout)
            .expect("update");

        assert!(matches!(
            window.absorb(&part),
            Err(WindowError::IncompatibleState(_))
        ));
        assert_eq!(window, before);
    }
}
