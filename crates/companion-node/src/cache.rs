use companion_protocol::{constants::TRUST_HISTORY_WEIGHT, PersonalityTraits};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::time::now_micros;

/// A verified personality snapshot for one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPersonality {
    pub traits: PersonalityTraits,
    /// Unix micros of the last verified exchange.
    pub last_updated: u64,
    /// Smoothed trust in [0, 1].
    pub trust: f64,
    /// Reliability of the latest observation in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
}

/// peer id → CachedPersonality with TTL expiry.
///
/// Reads take the shared lock; expired entries found on read are removed
/// under the exclusive lock. No lock is ever held across an await.
pub struct PersonalityCache {
    entries: RwLock<HashMap<String, CachedPersonality>>,
    ttl_micros: u64,
    initial_trust: f64,
}

impl PersonalityCache {
    pub fn new(ttl: Duration, initial_trust: f64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_micros: ttl.as_micros() as u64,
            initial_trust: initial_trust.clamp(0.0, 1.0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedPersonality>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedPersonality>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &CachedPersonality, now: u64) -> bool {
        now.saturating_sub(entry.last_updated) > self.ttl_micros
    }

    pub fn get(&self, peer_id: &str) -> Option<CachedPersonality> {
        self.get_at(peer_id, now_micros())
    }

    /// Live entry for `peer_id`, or None if absent or expired.
    pub fn get_at(&self, peer_id: &str, now: u64) -> Option<CachedPersonality> {
        {
            let entries = self.read();
            match entries.get(peer_id) {
                None => return None,
                Some(e) if !self.is_expired(e, now) => return Some(e.clone()),
                Some(_) => {}
            }
        }
        // Lazy eviction; re-check in case a store raced in.
        let mut entries = self.write();
        if entries.get(peer_id).is_some_and(|e| self.is_expired(e, now)) {
            entries.remove(peer_id);
            tracing::debug!(peer = %peer_id, "Evicted expired personality");
        }
        entries.get(peer_id).cloned()
    }

    pub fn store(&self, peer_id: &str, traits: PersonalityTraits, trust_delta: f64) -> CachedPersonality {
        self.store_at(peer_id, traits, trust_delta, now_micros())
    }

    /// Insert or refresh. First store uses the initial trust; later stores
    /// smooth toward `trust_delta`.
    pub fn store_at(
        &self,
        peer_id: &str,
        traits: PersonalityTraits,
        trust_delta: f64,
        now: u64,
    ) -> CachedPersonality {
        let delta = if trust_delta.is_finite() { trust_delta.clamp(0.0, 1.0) } else { 0.0 };
        let mut entries = self.write();
        let previous = entries
            .get(peer_id)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.trust);
        let trust = match previous {
            None => self.initial_trust,
            Some(old) => {
                (TRUST_HISTORY_WEIGHT * old + (1.0 - TRUST_HISTORY_WEIGHT) * delta).clamp(0.0, 1.0)
            }
        };
        let entry = CachedPersonality { traits, last_updated: now, trust, confidence: delta };
        entries.insert(peer_id.to_string(), entry.clone());
        entry
    }

    /// Current trust for a live entry.
    pub fn trust_at(&self, peer_id: &str, now: u64) -> Option<f64> {
        self.get_at(peer_id, now).map(|e| e.trust)
    }

    pub fn remove(&self, peer_id: &str) -> bool {
        self.write().remove(peer_id).is_some()
    }

    pub fn purge(&self) -> usize {
        self.purge_at(now_micros())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_at(&self, now: u64) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !self.is_expired(e, now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(now_micros())
    }

    pub fn stats_at(&self, now: u64) -> CacheStats {
        let entries = self.read();
        CacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| self.is_expired(e, now)).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
