//! Temporal validity for graph records.
//!
//! Every entity and relation carries a validity window. A record whose
//! `valid_to` is unset is current. Once `valid_to` is stamped the record is
//! historical and drops out of any "only valid" query.
//!
//! Timestamps are stored as epoch milliseconds, so every timestamp produced
//! here is truncated to millisecond precision. That keeps a record read back
//! from the database equal to the record that was written.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns the current time truncated to millisecond precision.
#[must_use]
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Converts epoch milliseconds into a UTC timestamp.
///
/// Out-of-range values clamp to the Unix epoch.
#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Converts a UTC timestamp into epoch milliseconds.
#[must_use]
pub const fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Half-open validity window `[valid_from, valid_to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// When the record became valid.
    pub valid_from: DateTime<Utc>,
    /// When the record stopped being valid (None = current).
    pub valid_to: Option<DateTime<Utc>>,
}

impl Validity {
    /// Creates a window that starts now and is still open.
    #[must_use]
    pub fn from_now() -> Self {
        Self::starting(now())
    }

    /// Creates an open window starting at `valid_from`.
    #[must_use]
    pub const fn starting(valid_from: DateTime<Utc>) -> Self {
        Self {
            valid_from,
            valid_to: None,
        }
    }

    /// Returns true while `valid_to` is unset.
    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Returns true if the window contains the given instant.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_to.is_none_or(|end| at < end)
    }

    /// Closes the window at the given instant.
    #[must_use]
    pub const fn close_at(self, end: DateTime<Utc>) -> Self {
        Self {
            valid_from: self.valid_from,
            valid_to: Some(end),
        }
    }
}

impl Default for Validity {
    fn default() -> Self {
        Self::from_now()
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.valid_to {
            Some(end) => write!(f, "[{}, {})", self.valid_from.to_rfc3339(), end.to_rfc3339()),
            None => write!(f, "[{}, ..)", self.valid_from.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_now_is_millisecond_precision() {
        let ts = now();
        assert_eq!(from_millis(to_millis(&ts)), ts);
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_validity_current() {
        let v = Validity::from_now();
        assert!(v.is_current());
        assert!(v.contains(now() + Duration::days(365)));
    }

    #[test]
    fn test_validity_closed() {
        let start = from_millis(1_000);
        let v = Validity::starting(start).close_at(from_millis(2_000));
        assert!(!v.is_current());
        assert!(v.contains(from_millis(1_000)));
        assert!(v.contains(from_millis(1_999)));
        assert!(!v.contains(from_millis(2_000)));
        assert!(!v.contains(from_millis(999)));
    }

    #[test]
    fn test_display() {
        let v = Validity::starting(from_millis(0));
        assert!(v.to_string().ends_with(", ..)"));
    }
}
