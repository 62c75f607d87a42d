//! Wall-clock helpers.
//!
//! The engine itself never reads the clock: every time-dependent operation
//! takes `now` explicitly. These helpers are for the callers that supply it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **seconds** since Unix epoch.
#[inline]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Seconds from `now` until `at`, zero if `at` has passed.
#[inline]
pub fn secs_until(at: u64, now: u64) -> u64 {
    at.saturating_sub(now)
}
