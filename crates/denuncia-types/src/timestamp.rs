use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp assigned by the document store at write time.
///
/// A hybrid logical value: a wall-clock millisecond component plus a logical
/// counter that disambiguates writes landing in the same millisecond. The
/// caller's local clock never produces one of these; only the store does.
///
/// Ordering: `millis` → `logical` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTimestamp {
    /// Wall-clock milliseconds since UNIX epoch.
    pub millis: u64,
    /// Logical counter for writes at the same physical time.
    pub logical: u32,
}

impl ServerTimestamp {
    /// Create a timestamp with explicit values.
    pub fn new(millis: u64, logical: u32) -> Self {
        Self { millis, logical }
    }

    /// A timestamp for the current wall-clock time with a zero counter.
    pub fn wall_clock() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self { millis, logical: 0 }
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self {
            millis: 0,
            logical: 0,
        }
    }

    /// Returns `true` if this timestamp is strictly after `other`.
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    /// The physical component as a UTC date-time, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.millis).ok()?)
    }
}

impl PartialOrd for ServerTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerTimestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis
            .cmp(&other.millis)
            .then(self.logical.cmp(&other.logical))
    }
}

impl fmt::Debug for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerTimestamp({}ms.{})", self.millis, self.logical)
    }
}

impl fmt::Display for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(
                f,
                "{}+{}",
                dt.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.logical
            ),
            None => write!(f, "{}ms+{}", self.millis, self.logical),
        }
    }
}
