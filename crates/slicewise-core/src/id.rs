//! Strongly-typed identifiers used across the engine.
//!
//! Workers, operators and upstream origins are all plain counters underneath;
//! the wrappers keep them from being mixed up at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(OperatorId);
new_id!(OriginId);
new_id!(WorkerId);

impl WorkerId {
    /// Dense index of the worker, usable for per-worker vectors.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_type_name() {
        assert_eq!(WorkerId::new(3).to_string(), "WorkerId(3)");
        assert_eq!(OriginId::from(7).get(), 7);
        assert_eq!(WorkerId::new(2).index(), 2);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&OperatorId::new(42)).expect("serialize");
        assert_eq!(json, "42");
        let back: OperatorId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, OperatorId::new(42));
    }
}
