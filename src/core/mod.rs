//! Core data model: terms, tuples, patterns, bindings and expiration timestamps.

use serde::{Serialize, Serializer};

pub mod binding;
pub mod clock;
pub mod pattern;
pub mod term;

pub use binding::Binding;
pub use clock::{Clock, ManualClock, SystemClock};
pub use pattern::{GraphPattern, PatternSet, Slot, TuplePattern};
pub use term::{Term, Tuple, Variable};

/// Point in time (milliseconds) after which something is no longer valid.
///
/// `At(_)` always orders before `Never`, so taking the minimum over several
/// contributions ignores infinite ones.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Expiration {
    At(u64),
    Never,
}

impl Expiration {
    /// `now + ttl` for a positive ttl in seconds, `Never` for a ttl of 0.
    pub fn from_ttl(now_millis: u64, ttl_secs: u64) -> Self {
        if ttl_secs == 0 {
            Expiration::Never
        } else {
            Expiration::At(now_millis.saturating_add(ttl_secs.saturating_mul(1000)))
        }
    }

    pub fn is_expired(self, now_millis: u64) -> bool {
        matches!(self, Expiration::At(ms) if ms <= now_millis)
    }
}

impl Serialize for Expiration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expiration::At(ms) => serializer.serialize_some(ms),
            Expiration::Never => serializer.serialize_none(),
        }
    }
}
