//! Clock helpers.
//!
//! The rate limiter tracks request timestamps as unix epoch milliseconds so
//! that admission decisions take an explicit `now` and tests can drive a
//! synthetic clock.

use time::OffsetDateTime;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000).max(0) as u64
}
