//! Trigger policies decide when a candidate window is evaluated and whether it fires.

use serde::{Deserialize, Serialize};

use crate::assigner::TimeRange;
use crate::error::{Result, WindowError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Evaluate whenever the worker observes the watermark advance.
    #[default]
    OnWatermarkChange,
    /// Evaluate after every `every` records ingested by a worker.
    Count { every: u64 },
    /// Evaluate on watermark advance or after `every` records.
    Hybrid { every: u64 },
}

impl TriggerPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerPolicy::OnWatermarkChange => "on_watermark_change",
            TriggerPolicy::Count { .. } => "count",
            TriggerPolicy::Hybrid { .. } => "hybrid",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerPolicy::Count { every: 0 } | TriggerPolicy::Hybrid { every: 0 } => Err(
                WindowError::Config(format!("{} trigger needs every > 0", self.name())),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Fire,
    Wait,
    Expire,
}

/// A window under evaluation and how many records its slices hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateWindow {
    pub range: TimeRange,
    pub records: u64,
}

/// A policy bound to the operator's lateness and empty-window setting.
#[derive(Debug, Clone, Copy)]
pub struct WindowTrigger {
    policy: TriggerPolicy,
    allowed_lateness: u64,
    emit_empty: bool,
}

impl WindowTrigger {
    pub fn new(policy: TriggerPolicy, allowed_lateness: u64, emit_empty: bool) -> Self {
        Self {
            policy,
            allowed_lateness,
            emit_empty,
        }
    }

    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }

    /// Whether a worker should hand over closed slices now.
    pub fn should_evaluate(&self, watermark_advanced: bool, records_since_evaluation: u64) -> bool {
        match self.policy {
            TriggerPolicy::OnWatermarkChange => watermark_advanced,
            TriggerPolicy::Count { every } => records_since_evaluation >= every,
            TriggerPolicy::Hybrid { every } => {
                watermark_advanced || records_since_evaluation >= every
            }
        }
    }

    pub fn evaluate(&self, watermark: u64, candidate: &CandidateWindow) -> TriggerDecision {
        if watermark < candidate.range.end.saturating_add(self.allowed_lateness) {
            TriggerDecision::Wait
        } else if candidate.records == 0 && !self.emit_empty {
            TriggerDecision::Expire
        } else {
            TriggerDecision::Fire
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(end: u64, records: u64) -> CandidateWindow {
        CandidateWindow {
            range: TimeRange::new(end - 100, end),
            records,
        }
    }

    #[test]
    fn waits_until_end_plus_lateness() {
        let t = WindowTrigger::new(TriggerPolicy::OnWatermarkChange, 10, false);
        assert_eq!(t.evaluate(105, &candidate(100, 3)), TriggerDecision::Wait);
        assert_eq!(t.evaluate(110, &candidate(100, 3)), TriggerDecision::Fire);
    }

    #[test]
    fn empty_windows_expire_unless_configured() {
        let drop_empty = WindowTrigger::new(TriggerPolicy::OnWatermarkChange, 0, false);
        let keep_empty = WindowTrigger::new(TriggerPolicy::OnWatermarkChange, 0, true);
        assert_eq!(drop_empty.evaluate(200, &candidate(100, 0)), TriggerDecision::Expire);
        assert_eq!(keep_empty.evaluate(200, &candidate(100, 0)), TriggerDecision::Fire);
        assert_eq!(keep_empty.evaluate(50, &candidate(100, 0)), TriggerDecision::Wait);
    }

    #[test]
    fn evaluation_cadence_per_policy() {
        let wm = WindowTrigger::new(TriggerPolicy::OnWatermarkChange, 0, false);
        assert!(wm.should_evaluate(true, 0));
        assert!(!wm.should_evaluate(false, 1_000));

        let count = WindowTrigger::new(TriggerPolicy::Count { every: 3 }, 0, false);
        assert!(!count.should_evaluate(true, 2));
        assert!(count.should_evaluate(false, 3));

        let hybrid = WindowTrigger::new(TriggerPolicy::Hybrid { every: 3 }, 0, false);
        assert!(hybrid.should_evaluate(true, 0));
        assert!(hybrid.should_evaluate(false, 3));
        assert!(!hybrid.should_evaluate(false, 2));
    }

    #[test]
    fn zero_count_is_invalid() {
        assert!(TriggerPolicy::Count { every: 0 }.validate().is_err());
        assert!(TriggerPolicy::Hybrid { every: 1 }.validate().is_ok());
    }

    #[test]
    fn policy_parses_from_yaml() {
        let p: TriggerPolicy = serde_yaml::from_str("type: count\nevery: 50").expect("parse");
        assert_eq!(p, TriggerPolicy::Count { every: 50 });
    }
}
