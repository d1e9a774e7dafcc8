//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Unix epoch, used as the "never fetched" marker
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Oldest fetch timestamp still considered fresh at `now` for the given TTL.
///
/// Saturates at the epoch for TTLs larger than chrono can represent.
pub fn freshness_cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or_else(epoch)
}

/// True when a record fetched at `fetched_at` has outlived `ttl` at `now`
pub fn is_stale(fetched_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    fetched_at < freshness_cutoff(now, ttl)
}
