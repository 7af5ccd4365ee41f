use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;

/// Maximum number of distinct peers tracked in memory.
/// Bounds growth from floods with rotating sender ids.
const MAX_PEERS: usize = 10_000;

/// How a peer's key became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Supplied by the session layer or configuration.
    Registered,
    /// Pinned on first verified contact.
    Pinned,
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub verifying_key: VerifyingKey,
    pub origin: KeyOrigin,
    /// Unix micros of the last verified message.
    pub last_seen: u64,
}

/// In-memory key registry: peer id → verifying key.
///
/// Not synchronized; the protocol manager wraps it in a lock.
#[derive(Default)]
pub struct PeerStateMap {
    peers: HashMap<String, PeerEntry>,
}

impl PeerStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_room(&mut self, incoming: &str) {
        if self.peers.contains_key(incoming) || self.peers.len() < MAX_PEERS {
            return;
        }
        // Prefer evicting pinned keys; registered peers were vouched for.
        let victim = self
            .peers
            .iter()
            .filter(|(_, e)| e.origin == KeyOrigin::Pinned)
            .min_by_key(|(_, e)| e.last_seen)
            .or_else(|| self.peers.iter().min_by_key(|(_, e)| e.last_seen))
            .map(|(k, _)| k.clone());
        if let Some(victim) = victim {
            tracing::debug!(peer = %victim, "Evicting least recently seen peer key");
            self.peers.remove(&victim);
        }
    }

    /// Register a key out of band. Replaces any pinned key.
    pub fn register_key(&mut self, peer_id: &str, key: VerifyingKey, now: u64) {
        self.make_room(peer_id);
        self.peers.insert(
            peer_id.to_string(),
            PeerEntry { verifying_key: key, origin: KeyOrigin::Registered, last_seen: now },
        );
    }

    /// Pin `key` for `peer_id` if no key is known yet.
    /// Returns true if this call pinned it.
    pub fn pin_key(&mut self, peer_id: &str, key: VerifyingKey, now: u64) -> bool {
        if self.peers.contains_key(peer_id) {
            return false;
        }
        self.make_room(peer_id);
        self.peers.insert(
            peer_id.to_string(),
            PeerEntry { verifying_key: key, origin: KeyOrigin::Pinned, last_seen: now },
        );
        true
    }

    pub fn verifying_key(&self, peer_id: &str) -> Option<VerifyingKey> {
        self.peers.get(peer_id).map(|e| e.verifying_key)
    }

    pub fn origin(&self, peer_id: &str) -> Option<KeyOrigin> {
        self.peers.get(peer_id).map(|e| e.origin)
    }

    pub fn is_verified(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn touch(&mut self, peer_id: &str, now: u64) {
        if let Some(e) = self.peers.get_mut(peer_id) {
            e.last_seen = e.last_seen.max(now);
        }
    }

    /// All peers with a known key, sorted by id.
    pub fn verified_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Peer departure.
    pub fn forget(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
