use std::time::{SystemTime, UNIX_EPOCH};

pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Wall-clock time in Unix microseconds.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

pub fn secs_to_micros(secs: u64) -> u64 {
    secs.saturating_mul(MICROS_PER_SEC)
}
