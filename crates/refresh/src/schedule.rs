//! Refresh-due arithmetic

use caplife_core::{add_duration, sub_duration};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// When a capability must be re-delegated
///
/// `expires + clock_skew - max_ttl_before_refresh`: a capability is due once
/// its remaining lifetime (allowing for skew) drops to the policy's maximum.
pub fn refresh_due_time(
    expires: DateTime<Utc>,
    clock_skew: Duration,
    max_ttl_before_refresh: Duration,
) -> DateTime<Utc> {
    sub_duration(add_duration(expires, clock_skew), max_ttl_before_refresh)
}

/// The next refresh attempt, never sooner than `now + floor`
pub fn next_attempt(
    earliest_due: DateTime<Utc>,
    now: DateTime<Utc>,
    floor: Duration,
) -> DateTime<Utc> {
    earliest_due.max(add_duration(now, floor))
}
