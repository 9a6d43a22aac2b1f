//! Shared timestamp/id helpers for simulation records.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Unix-epoch milliseconds, used to order history scans.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn new_simulation_id() -> String {
    format!("sim_{}", Ulid::new())
}
