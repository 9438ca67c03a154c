//! Time-boxed leases for crash recovery.
//!
//! A lease turns the lock into a soft claim: its deadline is written into the
//! record, and once it has passed any contender may delete the record. This
//! unwedges a target whose holder crashed, at a price: if the lease is shorter
//! than the holder's real run time, a second process can start working on the
//! target while the first is still alive, and one of the two updates is lost.
//! The holder detects this at commit time and refuses to write.

use chrono::Utc;
use std::path::Path;
use std::time::Duration;

/// Shortest lease accepted; shorter requests are raised to this.
pub const MIN_LEASE: Duration = Duration::from_secs(2);

/// A requested lease duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    duration: Duration,
}

impl Lease {
    /// Create a lease, raising durations below [`MIN_LEASE`].
    pub fn new(duration: Duration) -> Self {
        if duration < MIN_LEASE {
            tracing::warn!(
                requested = duration.as_secs_f64(),
                minimum = MIN_LEASE.as_secs_f64(),
                "lease too short, raised to minimum"
            );
            return Self { duration: MIN_LEASE };
        }
        Self { duration }
    }

    /// Lease length from seconds, as given on the command line or in config.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Epoch second at which a lease taken now runs out.
    pub fn deadline_from_now(&self) -> i64 {
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX / 2);
        (now_ms + lease_ms) / 1000
    }
}

/// Current time in epoch seconds.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Log the lost-update risk of pairing a lease with a writable session.
pub fn warn_if_writable(lease: Option<Lease>, writable: bool, target: &Path) {
    if let Some(lease) = lease
        && writable
    {
        tracing::warn!(
            file = %target.display(),
            lease_secs = lease.duration().as_secs_f64(),
            "lease on a writable session: if the work outlives the lease another \
             process may take over the file and one update will be lost"
        );
    }
}
