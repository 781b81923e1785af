//! What happens when slices are merged and windows fire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assigner::{TimeRange, WindowAssigner};
use crate::error::{Result, WindowError};
use crate::slice::{Slice, StateLayout};

pub const UNKNOWN_ACTION: &str = "Unknown Action";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDescriptor {
    /// Each merged slice is a window. Tumbling windows only.
    SliceAggregation,
    /// Windows are composed from several merged slices.
    WindowAggregation,
}

impl ActionDescriptor {
    pub const fn tag(self) -> u8 {
        match self {
            ActionDescriptor::SliceAggregation => 1,
            ActionDescriptor::WindowAggregation => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ActionDescriptor::SliceAggregation),
            2 => Some(ActionDescriptor::WindowAggregation),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ActionDescriptor::SliceAggregation => "SliceAggregationTriggerAction",
            ActionDescriptor::WindowAggregation => "WindowAggregationTriggerAction",
        }
    }

    /// The cheapest action that is valid for `assigner`.
    pub fn default_for(assigner: &WindowAssigner) -> Self {
        if assigner.is_tumbling() {
            ActionDescriptor::SliceAggregation
        } else {
            ActionDescriptor::WindowAggregation
        }
    }

    pub fn validate(self, assigner: &WindowAssigner) -> Result<()> {
        if self == ActionDescriptor::SliceAggregation && !assigner.is_tumbling() {
            return Err(WindowError::Config(format!(
                "{} requires tumbling windows, got {assigner}",
                self.type_name()
            )));
        }
        Ok(())
    }

    /// Fold the per-worker slices of one range into a single slice.
    pub fn merge_slices(
        self,
        range: TimeRange,
        slices: Vec<Slice>,
        layout: &StateLayout,
    ) -> Result<Slice> {
        let mut parts = slices.into_iter();
        let mut merged = match parts.next() {
            Some(first) if first.range() == range => first,
            Some(first) => {
                return Err(WindowError::Invariant(format!(
                    "slice {} staged under range {range}",
                    first.range()
                )))
            }
            None => Slice::new(range, layout.empty_state()),
        };
        for part in parts {
            if part.range() != range {
                return Err(WindowError::Invariant(format!(
                    "slice {} staged under range {range}",
                    part.range()
                )));
            }
            merged.absorb(&part)?;
        }
        Ok(merged)
    }

    /// Build the final aggregate of `window` from the merged slices it contains.
    pub fn compose_window<'a>(
        self,
        window: TimeRange,
        slices: impl IntoIterator<Item = &'a Slice>,
        layout: &StateLayout,
    ) -> Result<Slice> {
        let mut out = Slice::new(window, layout.empty_state());
        match self {
            ActionDescriptor::SliceAggregation => {
                let mut parts = slices.into_iter();
                if let Some(only) = parts.next() {
                    if only.range() != window || parts.next().is_some() {
                        return Err(WindowError::Invariant(format!(
                            "slice aggregation expects exactly the slice {window}"
                        )));
                    }
                    out.absorb(only)?;
                }
            }
            ActionDescriptor::WindowAggregation => {
                for s in slices {
                    out.absorb(s)?;
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Human-readable name for a numeric action tag; unknown tags do not fail.
pub fn action_type_name(tag: u8) -> &'static str {
    ActionDescriptor::from_tag(tag).map_or(UNKNOWN_ACTION, ActionDescriptor::type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use slicewise_core::measure::WindowMeasure;

    fn layout() -> StateLayout {
        StateLayout::new(vec![Aggregation::Sum("v".into())], false)
    }

    fn slice(start: u64, end: u64, v: f64) -> Slice {
        let l = layout();
        let mut s = Slice::new(TimeRange::new(start, end), l.empty_state());
        s.update(None, &[Some(v)], &l).expect("update");
        s
    }

    #[test]
    fn type_names_and_unknown_tags() {
        assert_eq!(action_type_name(1), "SliceAggregationTriggerAction");
        assert_eq!(action_type_name(2), "WindowAggregationTriggerAction");
        assert_eq!(action_type_name(42), UNKNOWN_ACTION);
        assert_eq!(
            ActionDescriptor::WindowAggregation.to_string(),
            "WindowAggregationTriggerAction"
        );
    }

    #[test]
    fn slice_aggregation_rejects_sliding_windows() {
        let sliding = WindowAssigner::sliding(
            WindowMeasure::milliseconds(100),
            WindowMeasure::milliseconds(50),
        )
        .expect("assigner");
        assert!(ActionDescriptor::SliceAggregation.validate(&sliding).is_err());
        assert!(ActionDescriptor::WindowAggregation.validate(&sliding).is_ok());
        assert_eq!(
            ActionDescriptor::default_for(&sliding),
            ActionDescriptor::WindowAggregation
        );
    }

    #[test]
    fn merge_folds_worker_slices() {
        let r = TimeRange::new(0, 100);
        let merged = ActionDescriptor::SliceAggregation
            .merge_slices(r, vec![slice(0, 100, 1.0), slice(0, 100, 2.5)], &layout())
            .expect("merge");
        assert_eq!(merged.records(), 2);
        assert_eq!(merged.rows()[0].values[0], slicewise_core::types::Scalar::F64(3.5));

        let err = ActionDescriptor::SliceAggregation
            .merge_slices(r, vec![slice(0, 50, 1.0)], &layout())
            .expect_err("range mismatch");
        assert!(err.is_fatal());
    }

    #[test]
    fn window_aggregation_composes_contiguous_slices() {
        let parts = [slice(0, 50, 1.0), slice(50, 100, 2.0)];
        let w = ActionDescriptor::WindowAggregation
            .compose_window(TimeRange::new(0, 100), parts.iter(), &layout())
            .expect("compose");
        assert_eq!(w.records(), 2);

        let err = ActionDescriptor::SliceAggregation
            .compose_window(TimeRange::new(0, 100), parts.iter(), &layout())
            .expect_err("more than one slice");
        assert!(matches!(err, WindowError::Invariant(_)));
    }
}
