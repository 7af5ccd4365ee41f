use std::{
    collections::HashMap,
    sync::{RwLock, RwLockWriteGuard},
    time::Duration,
};

use crate::time::now_micros;

/// Per-peer cooldown gate.
///
/// `allow` records the attempt only when it succeeds, so a flood of denied
/// attempts cannot push the window past the original cooldown boundary.
pub struct RateLimiter {
    last_request: RwLock<HashMap<String, u64>>,
    cooldown_micros: u64,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_request: RwLock::new(HashMap::new()),
            cooldown_micros: cooldown.as_micros() as u64,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, u64>> {
        self.last_request.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn allow(&self, peer_id: &str) -> bool {
        self.allow_at(peer_id, now_micros())
    }

    pub fn allow_at(&self, peer_id: &str, now: u64) -> bool {
        let mut last = self.write();
        match last.get(peer_id) {
            Some(&t) if now.saturating_sub(t) < self.cooldown_micros => false,
            _ => {
                last.insert(peer_id.to_string(), now);
                true
            }
        }
    }

    /// Time until `peer_id` may be contacted again (zero if allowed now).
    pub fn remaining_at(&self, peer_id: &str, now: u64) -> Duration {
        let last = self.last_request.read().unwrap_or_else(|e| e.into_inner());
        let elapsed = last.get(peer_id).map(|&t| now.saturating_sub(t));
        match elapsed {
            Some(e) if e < self.cooldown_micros => Duration::from_micros(self.cooldown_micros - e),
            _ => Duration::ZERO,
        }
    }

    /// Forget peers whose window has long closed.
    pub fn prune_at(&self, now: u64) -> usize {
        let mut last = self.write();
        let before = last.len();
        last.retain(|_, t| now.saturating_sub(*t) < self.cooldown_micros);
        before - last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::secs_to_micros;

    #[test]
    fn cooldown_window() {
        let rl = RateLimiter::new(Duration::from_secs(30));
        assert!(rl.allow_at("a", 0));
        assert!(!rl.allow_at("a", secs_to_micros(10)));
        assert!(rl.allow_at("a", secs_to_micros(31)));
    }

    #[test]
    fn denial_does_not_extend_window() {
        let rl = RateLimiter::new(Duration::from_secs(30));
        assert!(rl.allow_at("a", 0));
        for s in 1..30 {
            assert!(!rl.allow_at("a", secs_to_micros(s)));
        }
        assert!(rl.allow_at("a", secs_to_micros(30)));
    }

    #[test]
    fn peers_are_independent() {
        let rl = RateLimiter::new(Duration::from_secs(30));
        assert!(rl.allow_at("a", 0));
        assert!(rl.allow_at("b", 0));
        assert!(!rl.allow_at("a", 1));
        assert_eq!(rl.remaining_at("a", secs_to_micros(20)), Duration::from_secs(10));
        assert_eq!(rl.remaining_at("c", 0), Duration::ZERO);
    }

    #[test]
    fn prune_drops_closed_windows() {
        let rl = RateLimiter::new(Duration::from_secs(30));
        rl.allow_at("a", 0);
        rl.allow_at("b", secs_to_micros(20));
        assert_eq!(rl.prune_at(secs_to_micros(40)), 1);
        assert!(!rl.allow_at("b", secs_to_micros(41)));
    }
}
