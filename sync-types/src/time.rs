//! Wall-clock timestamps carried in log records and headers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds and nanoseconds since the Unix epoch.
///
/// Informational only: ordering inside a shard comes from markers, never
/// from timestamps, since producer clocks can drift.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp {
    sec: u64,
    nsec: u32,
}

impl Timestamp {
    /// Create a timestamp from seconds and nanoseconds.
    ///
    /// Nanoseconds past one second carry into `sec`.
    pub fn new(sec: u64, nsec: u32) -> Self {
        let carry = u64::from(nsec / 1_000_000_000);
        Self {
            sec: sec.saturating_add(carry),
            nsec: nsec % 1_000_000_000,
        }
    }

    /// The epoch itself, used as "no time recorded".
    pub fn zero() -> Self {
        Self::default()
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Whole seconds since the epoch.
    pub fn sec(&self) -> u64 {
        self.sec
    }

    /// Sub-second nanoseconds.
    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    /// Convert back to a `SystemTime`.
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.sec, self.nsec)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Pre-epoch clocks collapse to zero.
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            sec: since.as_secs(),
            nsec: since.subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self)
    }
}
