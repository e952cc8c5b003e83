//! ID generation utilities for jobwright
//!
//! Provides timestamps and unique identifiers for jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or_default()
}

/// Whole milliseconds in `d`, saturating at `i64::MAX`
pub fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`
pub fn duration_ms_u64(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Generate a unique job ID
///
/// Format: `job-{timestamp_ms}-{counter}-{random_hex}`
/// Example: `job-1738300800123-000042-a1b2`
pub fn generate_job_id() -> String {
    let timestamp = now_ms();
    let counter = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let random: u16 = rand::rng().random();
    format!("job-{}-{:06}-{:04x}", timestamp, counter, random)
}
