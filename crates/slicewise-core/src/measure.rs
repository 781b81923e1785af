//! Event-time durations.
//!
//! All window arithmetic in slicewise happens on millisecond `u64` values, so a
//! measure is non-negative by construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A non-negative event-time duration in milliseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WindowMeasure(u64);

impl WindowMeasure {
    pub const ZERO: WindowMeasure = WindowMeasure(0);

    pub const fn milliseconds(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn seconds(s: u64) -> Self {
        Self(s.saturating_mul(1_000))
    }

    pub const fn minutes(m: u64) -> Self {
        Self(m.saturating_mul(60_000))
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for WindowMeasure {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

impl From<WindowMeasure> for Duration {
    fn from(m: WindowMeasure) -> Self {
        Duration::from_millis(m.0)
    }
}

impl fmt::Display for WindowMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
