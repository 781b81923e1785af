//! Window manager: assigner plus lateness for one operator instance.
//!
//! Built once at construction and shared read-only (behind an `Arc`) by every
//! worker.

use slicewise_core::id::OperatorId;
use slicewise_core::measure::WindowMeasure;

use crate::assigner::{TimeRange, WindowAssigner};

#[derive(Debug, Clone)]
pub struct WindowManager {
    operator: OperatorId,
    assigner: WindowAssigner,
    allowed_lateness: WindowMeasure,
}

impl WindowManager {
    pub fn new(operator: OperatorId, assigner: WindowAssigner, allowed_lateness: WindowMeasure) -> Self {
        Self {
            operator,
            assigner,
            allowed_lateness,
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn assigner(&self) -> &WindowAssigner {
        &self.assigner
    }

    pub fn allowed_lateness(&self) -> WindowMeasure {
        self.allowed_lateness
    }

    /// Watermark minus lateness: slices ending at or before it are closed.
    pub fn closing_watermark(&self, watermark: u64) -> u64 {
        watermark.saturating_sub(self.allowed_lateness.as_millis())
    }

    /// Inverse of [`closing_watermark`](Self::closing_watermark).
    pub fn watermark_for_closing(&self, closing: u64) -> u64 {
        closing.saturating_add(self.allowed_lateness.as_millis())
    }

    /// A record at `ts` is accepted iff `watermark <= ts + allowed_lateness`.
    pub fn admits(&self, ts: u64, watermark: u64) -> bool {
        watermark <= ts.saturating_add(self.allowed_lateness.as_millis())
    }

    /// True once no record admitted from now on can land in `window`.
    pub fn is_closed(&self, window: &TimeRange, watermark: u64) -> bool {
        watermark >= window.end.saturating_add(self.allowed_lateness.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(lateness: u64) -> WindowManager {
        WindowManager::new(
            OperatorId::new(1),
            WindowAssigner::tumbling(WindowMeasure::milliseconds(100)).expect("assigner"),
            WindowMeasure::milliseconds(lateness),
        )
    }

    #[test]
    fn admission_matches_closing_watermark() {
        let m = manager(50);
        assert!(m.admits(150, 200));
        assert!(!m.admits(149, 200));
        assert_eq!(m.closing_watermark(200), 150);
        assert_eq!(m.closing_watermark(20), 0);
        assert!(m.admits(0, 20));
    }

    #[test]
    fn window_closes_after_lateness() {
        let m = manager(50);
        let w = TimeRange::new(0, 100);
        assert!(!m.is_closed(&w, 149));
        assert!(m.is_closed(&w, 150));
        assert_eq!(m.watermark_for_closing(100), 150);
        assert_eq!(manager(0).watermark_for_closing(u64::MAX), u64::MAX);
    }
}
