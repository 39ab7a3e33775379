//! Epoch-millisecond time helpers.
//!
//! Orchestration record deadlines are stored as integer milliseconds since
//! the Unix epoch so they serialize the same way in every store backend.

use chrono::Utc;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
