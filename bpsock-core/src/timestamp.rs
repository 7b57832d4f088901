//! Bundle creation timestamps: seconds since the DTN epoch plus a sequence number.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// 2000-01-01T00:00:00Z in seconds since the Unix epoch.
pub const DTN_EPOCH_UNIX_SECS: u64 = 946_684_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BundleTimestamp {
    pub seconds: u64,
    pub sequence: u64,
}

impl BundleTimestamp {
    pub fn new(seconds: u64, sequence: u64) -> Self {
        Self { seconds, sequence }
    }

    /// Timestamp for `now` with the given sequence number. Times before the DTN epoch clamp to zero.
    pub fn now(sequence: u64) -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::new(unix.saturating_sub(DTN_EPOCH_UNIX_SECS), sequence)
    }

    /// Wall-clock time of this timestamp; `None` when it is not representable.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        let unix = DTN_EPOCH_UNIX_SECS.checked_add(self.seconds)?;
        UNIX_EPOCH.checked_add(Duration::from_secs(unix))
    }
}

impl fmt::Display for BundleTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.seconds, self.sequence)
    }
}
