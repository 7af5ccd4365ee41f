use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters for the protocol manager.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    received: AtomicU64,
    verified: AtomicU64,
    dropped_verification: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_rate_limited: AtomicU64,
    privacy_denied: AtomicU64,
    timeouts: AtomicU64,
    sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub verified: u64,
    pub dropped_verification: u64,
    pub dropped_malformed: u64,
    pub dropped_rate_limited: u64,
    pub privacy_denied: u64,
    pub timeouts: u64,
    pub sent: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ProtocolStats {
    counter! {
        inc_received => received,
        inc_verified => verified,
        inc_dropped_verification => dropped_verification,
        inc_dropped_malformed => dropped_malformed,
        inc_dropped_rate_limited => dropped_rate_limited,
        inc_privacy_denied => privacy_denied,
        inc_timeouts => timeouts,
        inc_sent => sent,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            dropped_verification: self.dropped_verification.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_rate_limited: self.dropped_rate_limited.load(Ordering::Relaxed),
            privacy_denied: self.privacy_denied.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}
