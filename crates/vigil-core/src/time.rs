//! Monotonic millisecond timestamps (§3: "Timestamps are integer
//! milliseconds since the Unix epoch").

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonotonicMs(pub i64);

impl MonotonicMs {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn plus_ms(self, ms: i64) -> Self {
        Self(self.0 + ms)
    }

    pub fn minus_ms(self, ms: i64) -> Self {
        Self(self.0 - ms)
    }

    /// Age of `self` relative to a later instant `at`. Saturates at zero so
    /// a clock hiccup never yields a negative age for decay math.
    pub fn age_ms(self, at: MonotonicMs) -> i64 {
        (at.0 - self.0).max(0)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MonotonicMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MonotonicMs {
    fn from(v: i64) -> Self {
        Self(v)
    }
}
