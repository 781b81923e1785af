//! Event-time window assignment.
//!
//! Windows are aligned to multiples of the slide and never start before 0.
//! Slices are the pieces between consecutive window edges: every window start
//! (`k * slide`) and every window end (`k * slide + size`) is a slice boundary,
//! so a record falls into exactly one slice and each window is a contiguous
//! run of slices.

use serde::{Deserialize, Serialize};
use slicewise_core::measure::WindowMeasure;

use crate::error::{Result, WindowError};

/// Half-open event-time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: u64) -> bool {
        self.start <= ts && ts < self.end
    }

    /// True when `other` lies entirely inside `self`.
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAssigner {
    Tumbling { size: u64 },
    Sliding { size: u64, slide: u64 },
}

impl WindowAssigner {
    /// Build an assigner; `slide == size` yields a tumbling assigner.
    pub fn new(size: WindowMeasure, slide: WindowMeasure) -> Result<Self> {
        if size.is_zero() {
            return Err(WindowError::Config("window size must be positive".into()));
        }
        if slide.is_zero() {
            return Err(WindowError::Config("window slide must be positive".into()));
        }
        if slide > size {
            return Err(WindowError::Config(format!(
                "window slide {slide} is larger than window size {size}"
            )));
        }
        let (size, slide) = (size.as_millis(), slide.as_millis());
        Ok(if slide == size {
            WindowAssigner::Tumbling { size }
        } else {
            WindowAssigner::Sliding { size, slide }
        })
    }

    pub fn tumbling(size: WindowMeasure) -> Result<Self> {
        Self::new(size, size)
    }

    pub fn sliding(size: WindowMeasure, slide: WindowMeasure) -> Result<Self> {
        Self::new(size, slide)
    }

    pub fn size(&self) -> u64 {
        match *self {
            WindowAssigner::Tumbling { size } | WindowAssigner::Sliding { size, .. } => size,
        }
    }

    pub fn slide(&self) -> u64 {
        match *self {
            WindowAssigner::Tumbling { size } => size,
            WindowAssigner::Sliding { slide, .. } => slide,
        }
    }

    pub fn is_tumbling(&self) -> bool {
        matches!(self, WindowAssigner::Tumbling { .. })
    }

    /// `ceil(size / slide)`: the most windows one timestamp can belong to.
    pub fn max_windows_per_record(&self) -> u64 {
        self.size().div_ceil(self.slide())
    }

    /// Every window containing `ts`, ascending by start.
    pub fn assign_windows(&self, ts: u64) -> Vec<TimeRange> {
        let (size, slide) = (self.size(), self.slide());
        let mut out = Vec::with_capacity(self.max_windows_per_record() as usize);
        let mut start = ts - ts % slide;
        loop {
            let end = start.saturating_add(size);
            if end <= ts {
                break;
            }
            out.push(TimeRange::new(start, end));
            if start < slide {
                break;
            }
            start -= slide;
        }
        out.reverse();
        out
    }

    /// The slice containing `ts`: bounded by the nearest window edges around it.
    pub fn slice_bounds(&self, ts: u64) -> TimeRange {
        let (size, slide) = (self.size(), self.slide());
        let prev_start = ts - ts % slide;
        let next_start = prev_start.saturating_add(slide);
        let (prev_end, next_end) = if ts < size {
            (0, size)
        } else {
            let offset = ts - size;
            let prev = size + (offset - offset % slide);
            (prev, prev.saturating_add(slide))
        };
        TimeRange::new(prev_start.max(prev_end), next_start.min(next_end))
    }

    /// Smallest window end strictly greater than `ts`.
    pub fn first_window_end_after(&self, ts: u64) -> u64 {
        let (size, slide) = (self.size(), self.slide());
        if ts < size {
            return size;
        }
        let steps = (ts - size) / slide + 1;
        size.saturating_add(steps.saturating_mul(slide))
    }

    /// Windows whose end lies in `(lo, hi]`, ascending by end.
    pub fn windows_ending_in(&self, lo: u64, hi: u64) -> impl Iterator<Item = TimeRange> {
        let (size, slide) = (self.size(), self.slide());
        let first = self.first_window_end_after(lo);
        std::iter::successors(Some(first), move |end| end.checked_add(slide))
            .take_while(move |end| *end <= hi)
            .map(move |end| TimeRange::new(end - size, end))
    }
}

impl std::fmt::Display for WindowAssigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowAssigner::Tumbling { size } => write!(f, "tumbling({size}ms)"),
            WindowAssigner::Sliding { size, slide } => write!(f, "sliding({size}ms/{slide}ms)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> WindowMeasure {
        WindowMeasure::milliseconds(v)
    }

    #[test]
    fn slide_larger_than_size_is_rejected() {
        assert!(matches!(
            WindowAssigner::new(ms(100), ms(200)),
            Err(WindowError::Config(_))
        ));
        assert!(WindowAssigner::new(ms(0), ms(0)).is_err());
        assert!(WindowAssigner::new(ms(100), ms(0)).is_err());
    }

    #[test]
    fn equal_slide_is_tumbling() {
        let a = WindowAssigner::new(ms(100), ms(100)).expect("assigner");
        assert!(a.is_tumbling());
        assert_eq!(a.assign_windows(250), vec![TimeRange::new(200, 300)]);
        assert_eq!(a.slice_bounds(250), TimeRange::new(200, 300));
    }

    #[test]
    fn sliding_windows_cover_timestamp() {
        let a = WindowAssigner::sliding(ms(1000), ms(500)).expect("assigner");
        assert_eq!(
            a.assign_windows(600),
            vec![TimeRange::new(0, 1000), TimeRange::new(500, 1500)]
        );
        assert_eq!(a.assign_windows(100), vec![TimeRange::new(0, 1000)]);
        assert_eq!(
            a.assign_windows(1200),
            vec![TimeRange::new(500, 1500), TimeRange::new(1000, 2000)]
        );
    }

    #[test]
    fn uneven_slide_slices_follow_window_edges() {
        let a = WindowAssigner::sliding(ms(100), ms(30)).expect("assigner");
        assert_eq!(a.slice_bounds(95), TimeRange::new(90, 100));
        assert_eq!(a.slice_bounds(100), TimeRange::new(100, 120));
        assert_eq!(a.slice_bounds(125), TimeRange::new(120, 130));
        assert_eq!(a.slice_bounds(5), TimeRange::new(0, 30));
    }

    #[test]
    fn slice_counts_over_a_stream() {
        // 100 records at 1, 11, ..., 991.
        let count_slices = |size, slide| {
            let a = WindowAssigner::sliding(ms(size), ms(slide)).expect("assigner");
            let mut seen: Vec<TimeRange> = (0..100).map(|i| a.slice_bounds(1 + i * 10)).collect();
            seen.dedup();
            seen.len()
        };
        assert_eq!(count_slices(100, 10), 100);
        assert_eq!(count_slices(100, 30), 64);
        assert_eq!(count_slices(100, 100), 10);
    }

    #[test]
    fn window_ends_are_enumerated_in_range() {
        let a = WindowAssigner::sliding(ms(1000), ms(500)).expect("assigner");
        let ends: Vec<u64> = a.windows_ending_in(0, 2000).map(|w| w.end).collect();
        assert_eq!(ends, vec![1000, 1500, 2000]);
        let ends: Vec<u64> = a.windows_ending_in(1000, 1499).map(|w| w.end).collect();
        assert!(ends.is_empty());
        assert_eq!(a.first_window_end_after(1000), 1500);
        assert_eq!(a.first_window_end_after(999), 1000);
    }
}
