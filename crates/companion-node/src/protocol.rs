use companion_protocol::{
    DialogContext, DialogQueryPayload, DialogReplyPayload, DialogResponse, Envelope, MsgType,
    PersonalityTraits, SelectionAnnouncePayload, TypedPayload,
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

use crate::{
    cache::{CachedPersonality, PersonalityCache},
    collaborators::{CharacterStore, ResponseGenerator},
    config::NodeSettings,
    error::NodeError,
    identity::CompanionIdentity,
    peer_state::PeerStateMap,
    rate_limit::RateLimiter,
    stats::ProtocolStats,
    time::now_micros,
    transport::Transport,
};

// --- Trust deltas ------------------------------------------------------------

/// Observation from a sender whose key we already knew.
const TRUST_DELTA_KNOWN_KEY: f64 = 1.0;
/// Observation that pinned the sender's key.
const TRUST_DELTA_PINNED: f64 = 0.6;
/// Subtracted when any received trait had to be clamped.
const TRUST_PENALTY_CLAMPED: f64 = 0.3;

/// A dialog candidate received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerDialogResponse {
    pub peer_id: String,
    pub response: DialogResponse,
    /// Round trip observed by the requester.
    pub latency: Duration,
}

enum Reply {
    Personality(CachedPersonality),
    Dialog(DialogResponse),
}

struct Waiter {
    peer_id: String,
    expect: MsgType,
    tx: oneshot::Sender<Reply>,
}

/// Removes its waiter when the request finishes, fails, or is dropped
/// mid-flight by an outer timeout.
struct PendingGuard<'a> {
    manager: &'a ProtocolManager,
    correlation_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.manager.pending().remove(&self.correlation_id);
    }
}

/// Frames, signs, sends, receives and dispatches companion envelopes.
///
/// Exchange attempts move `Idle → AwaitingReply → {Resolved | TimedOut}`.
/// A waiter is keyed by correlation id, so a timeout on one request never
/// disturbs another in flight to the same peer.
pub struct ProtocolManager {
    peer_id: String,
    signing_key: SigningKey,
    transport: Arc<dyn Transport>,
    character: Arc<dyn CharacterStore>,
    generator: Option<Arc<dyn ResponseGenerator>>,
    cache: Arc<PersonalityCache>,
    settings: NodeSettings,
    /// Outbound personality requests.
    request_limiter: RateLimiter,
    /// Inbound personality requests (anti-farming).
    serve_limiter: RateLimiter,
    peers: RwLock<PeerStateMap>,
    pending: Mutex<HashMap<u64, Waiter>>,
    next_correlation: AtomicU64,
    stats: ProtocolStats,
}

impl ProtocolManager {
    pub fn new(
        identity: &CompanionIdentity,
        transport: Arc<dyn Transport>,
        character: Arc<dyn CharacterStore>,
        cache: Arc<PersonalityCache>,
        settings: NodeSettings,
    ) -> Self {
        Self {
            peer_id: identity.peer_id.clone(),
            signing_key: identity.signing_key.clone(),
            transport,
            character,
            generator: None,
            cache,
            request_limiter: RateLimiter::new(settings.rate_limit_cooldown),
            serve_limiter: RateLimiter::new(settings.rate_limit_cooldown),
            settings,
            peers: RwLock::new(PeerStateMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_correlation: AtomicU64::new(1),
            stats: ProtocolStats::default(),
        }
    }

    /// Answer DialogQuery messages with `generator`.
    pub fn with_generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn cache(&self) -> &Arc<PersonalityCache> {
        &self.cache
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    // ========================================================================
    // Key registry
    // ========================================================================

    /// Register a peer's key out of band (session layer / configuration).
    pub fn register_key(&self, peer_id: &str, key: VerifyingKey) {
        self.peers_mut().register_key(peer_id, key, now_micros());
    }

    pub fn is_verified(&self, peer_id: &str) -> bool {
        self.peers_ref().is_verified(peer_id)
    }

    pub fn verified_peers(&self) -> Vec<String> {
        self.peers_ref().verified_peers()
    }

    /// Peer departure: drop its key and cached personality.
    pub fn forget_peer(&self, peer_id: &str) {
        self.peers_mut().forget(peer_id);
        self.cache.remove(peer_id);
        tracing::debug!(peer = %peer_id, "Peer forgotten");
    }

    /// Sweep expired cache entries and closed rate-limit windows.
    pub fn purge_at(&self, now: u64) -> usize {
        self.request_limiter.prune_at(now);
        self.serve_limiter.prune_at(now);
        self.cache.purge_at(now)
    }

    fn peers_ref(&self) -> std::sync::RwLockReadGuard<'_, PeerStateMap> {
        self.peers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn peers_mut(&self) -> std::sync::RwLockWriteGuard<'_, PeerStateMap> {
        self.peers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn next_correlation_id(&self) -> u64 {
        self.next_correlation.fetch_add(1, Ordering::Relaxed)
    }

    fn envelope(
        &self,
        msg_type: MsgType,
        correlation_id: u64,
        traits: PersonalityTraits,
        payload: Option<Vec<u8>>,
    ) -> Envelope {
        Envelope::build(
            msg_type,
            &self.peer_id,
            correlation_id,
            traits,
            payload,
            now_micros(),
            &self.signing_key,
        )
    }

    fn typed_envelope<P: TypedPayload>(&self, correlation_id: u64, payload: &P) -> Result<Envelope, NodeError> {
        Ok(Envelope::with_payload(&self.peer_id, correlation_id, payload, now_micros(), &self.signing_key)?)
    }

    // Encoding and the network call happen with no lock held.
    async fn send_envelope(&self, peer_id: &str, env: &Envelope) -> Result<(), NodeError> {
        let bytes = env.to_json()?;
        self.transport.send(peer_id, bytes).await?;
        self.stats.inc_sent();
        tracing::debug!(peer = %peer_id, msg_type = %env.msg_type, checksum = %env.checksum, "Sent envelope");
        Ok(())
    }

    /// Send a PERSONALITY_REQUEST. Fails fast with `RateLimited` inside the
    /// cooldown window. Returns the correlation id used.
    pub async fn send_personality_request(&self, peer_id: &str) -> Result<u64, NodeError> {
        let correlation_id = self.next_correlation_id();
        self.send_personality_request_with(peer_id, correlation_id).await?;
        Ok(correlation_id)
    }

    async fn send_personality_request_with(&self, peer_id: &str, correlation_id: u64) -> Result<(), NodeError> {
        let now = now_micros();
        if !self.request_limiter.allow_at(peer_id, now) {
            let wait = self.request_limiter.remaining_at(peer_id, now);
            tracing::debug!(peer = %peer_id, retry_in_ms = wait.as_millis() as u64, "Personality request inside cooldown");
            return Err(NodeError::RateLimited(format!("{peer_id}, retry in {}s", wait.as_secs().max(1))));
        }
        let env = self.envelope(MsgType::PersonalityRequest, correlation_id, PersonalityTraits::new(), None);
        self.send_envelope(peer_id, &env).await
    }

    /// Send our personality to `peer_id` if privacy settings allow it.
    ///
    /// `SharePersonality = false`, or a peer below the configured trust
    /// level, short-circuits with `PrivacyDenied` and no network call.
    pub async fn send_personality_response(
        &self,
        peer_id: &str,
        correlation_id: u64,
        traits: &PersonalityTraits,
    ) -> Result<(), NodeError> {
        let privacy = self.character.privacy_settings();
        let peer_trust = self
            .cache
            .trust_at(peer_id, now_micros())
            .unwrap_or(self.settings.initial_trust);
        if !privacy.permits(peer_trust) {
            self.stats.inc_privacy_denied();
            return Err(NodeError::PrivacyDenied(peer_id.to_string()));
        }
        let shared = traits.filtered(&privacy.shared_traits);
        let env = self.envelope(MsgType::PersonalityResponse, correlation_id, shared, None);
        self.send_envelope(peer_id, &env).await
    }

    /// Push our own personality unprompted.
    pub async fn share_personality(&self, peer_id: &str) -> Result<(), NodeError> {
        let traits = self.character.local_personality();
        self.send_personality_response(peer_id, self.next_correlation_id(), &traits).await
    }

    fn register_waiter(&self, peer_id: &str, expect: MsgType) -> (PendingGuard<'_>, oneshot::Receiver<Reply>) {
        let correlation_id = self.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(correlation_id, Waiter { peer_id: peer_id.to_string(), expect, tx });
        (PendingGuard { manager: self, correlation_id }, rx)
    }

    async fn await_reply(
        &self,
        peer_id: &str,
        guard: &PendingGuard<'_>,
        rx: oneshot::Receiver<Reply>,
        budget: Duration,
    ) -> Result<Reply, NodeError> {
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NodeError::Transport(format!("waiter for {peer_id} dropped"))),
            Err(_) => {
                self.stats.inc_timeouts();
                tracing::debug!(peer = %peer_id, correlation_id = guard.correlation_id, "Exchange timed out");
                Err(NodeError::Timeout(peer_id.to_string()))
            }
        }
    }

    /// Request a peer's personality and wait for it, bounded by the exchange
    /// timeout. The verified reply is already in the cache on success.
    pub async fn request_personality(&self, peer_id: &str) -> Result<CachedPersonality, NodeError> {
        let (guard, rx) = self.register_waiter(peer_id, MsgType::PersonalityResponse);
        self.send_personality_request_with(peer_id, guard.correlation_id).await?;
        match self.await_reply(peer_id, &guard, rx, self.settings.exchange_timeout).await? {
            Reply::Personality(p) => Ok(p),
            Reply::Dialog(_) => Err(NodeError::Transport(format!("unexpected reply from {peer_id}"))),
        }
    }

    /// Ask a peer for a dialog candidate, waiting at most `budget`.
    pub async fn query_dialog(
        &self,
        peer_id: &str,
        context: &DialogContext,
        budget: Duration,
    ) -> Result<PeerDialogResponse, NodeError> {
        let started = Instant::now();
        let (guard, rx) = self.register_waiter(peer_id, MsgType::DialogReply);
        let payload = DialogQueryPayload { context: context.clone() };
        let env = self.typed_envelope(guard.correlation_id, &payload)?;
        self.send_envelope(peer_id, &env).await?;
        match self.await_reply(peer_id, &guard, rx, budget).await? {
            Reply::Dialog(response) => Ok(PeerDialogResponse {
                peer_id: peer_id.to_string(),
                response,
                latency: started.elapsed(),
            }),
            Reply::Personality(_) => Err(NodeError::Transport(format!("unexpected reply from {peer_id}"))),
        }
    }

    /// Fire-and-forget SELECTION_ANNOUNCE.
    pub async fn announce_selection(&self, peer_id: &str, announce: &SelectionAnnouncePayload) -> Result<(), NodeError> {
        let env = self.typed_envelope(self.next_correlation_id(), announce)?;
        self.send_envelope(peer_id, &env).await
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handle one inbound frame from `peer_id`.
    ///
    /// Anything that fails parsing or verification is dropped and counted;
    /// no error ever leaves this function.
    pub async fn on_bytes(&self, peer_id: &str, bytes: &[u8]) {
        self.stats.inc_received();

        let env = match Envelope::from_json(bytes) {
            Ok(e) => e,
            Err(e) => {
                self.stats.inc_dropped_malformed();
                tracing::debug!(peer = %peer_id, "Envelope decode failed: {e}");
                return;
            }
        };

        let newly_pinned = match self.verify(peer_id, &env) {
            Some(pinned) => pinned,
            None => return,
        };
        self.stats.inc_verified();
        tracing::debug!(peer = %peer_id, msg_type = %env.msg_type, checksum = %env.checksum, "Verified envelope");

        match env.msg_type {
            MsgType::PersonalityRequest => self.handle_personality_request(peer_id, &env).await,
            MsgType::PersonalityResponse => self.handle_personality_response(peer_id, &env, newly_pinned).await,
            MsgType::DialogQuery => self.handle_dialog_query(peer_id, &env).await,
            MsgType::DialogReply => self.handle_dialog_reply(peer_id, &env),
            MsgType::SelectionAnnounce => self.handle_selection_announce(peer_id, &env),
        }
    }

    /// Verify sender, key, checksum, signature and freshness.
    /// Returns `Some(newly_pinned)` on success.
    fn verify(&self, peer_id: &str, env: &Envelope) -> Option<bool> {
        if env.sender_id != peer_id {
            self.stats.inc_dropped_verification();
            tracing::debug!(peer = %peer_id, claimed = %env.sender_id, "Sender id does not match session peer");
            return None;
        }

        let pinned = self.peers_ref().verifying_key(peer_id);
        if pinned.is_none() && !self.settings.trust_on_first_use {
            self.stats.inc_dropped_verification();
            tracing::debug!(peer = %peer_id, "No registered key, dropping");
            return None;
        }

        let now = now_micros();
        let key = match env.verify(pinned.as_ref(), now, self.settings.timestamp_tolerance.as_secs()) {
            Ok(k) => k,
            Err(e) => {
                self.stats.inc_dropped_verification();
                tracing::debug!(peer = %peer_id, "Envelope verification failed: {e}");
                return None;
            }
        };

        let mut peers = self.peers_mut();
        // Another frame may have pinned a key since the read above.
        if pinned.is_none() && peers.verifying_key(peer_id).is_some_and(|k| k != key) {
            drop(peers);
            self.stats.inc_dropped_verification();
            tracing::debug!(peer = %peer_id, "Key changed during first contact, dropping");
            return None;
        }
        let newly_pinned = pinned.is_none() && peers.pin_key(peer_id, key, now);
        if newly_pinned {
            tracing::info!(peer = %peer_id, public_key = %hex::encode(key.to_bytes()), "Pinned peer key on first use");
        }
        peers.touch(peer_id, now);
        Some(newly_pinned)
    }

    fn wake(&self, peer_id: &str, correlation_id: u64, got: MsgType, reply: Reply) -> bool {
        let waiter = {
            let mut pending = self.pending();
            match pending.get(&correlation_id) {
                Some(w) if w.peer_id == peer_id && w.expect == got => pending.remove(&correlation_id),
                _ => None,
            }
        };
        match waiter {
            // A dropped receiver means the request already timed out.
            Some(w) => w.tx.send(reply).is_ok(),
            None => false,
        }
    }

    async fn handle_personality_request(&self, peer_id: &str, env: &Envelope) {
        if !self.serve_limiter.allow(peer_id) {
            self.stats.inc_dropped_rate_limited();
            tracing::debug!(peer = %peer_id, "Personality request inside cooldown, ignoring");
            return;
        }
        let traits = self.character.local_personality();
        match self.send_personality_response(peer_id, env.correlation_id, &traits).await {
            Ok(()) => {}
            Err(NodeError::PrivacyDenied(_)) => {
                tracing::debug!(peer = %peer_id, "Not sharing personality (privacy)");
            }
            Err(e) => tracing::warn!(peer = %peer_id, "Personality response failed: {e}"),
        }
    }

    async fn handle_personality_response(&self, peer_id: &str, env: &Envelope, newly_pinned: bool) {
        let sanitized = match env.personality_traits.sanitize() {
            Ok(s) => s,
            Err(e) => {
                self.stats.inc_dropped_verification();
                tracing::debug!(peer = %peer_id, "Rejecting personality: {e}");
                return;
            }
        };

        let mut delta = if newly_pinned { TRUST_DELTA_PINNED } else { TRUST_DELTA_KNOWN_KEY };
        if sanitized.clamped > 0 {
            delta -= TRUST_PENALTY_CLAMPED;
        }
        let entry = self.cache.store(peer_id, sanitized.traits, delta.max(0.0));
        tracing::debug!(peer = %peer_id, trust = entry.trust, confidence = entry.confidence, "Cached personality");

        let solicited = self.wake(peer_id, env.correlation_id, MsgType::PersonalityResponse, Reply::Personality(entry));

        // Only answers to our own requests trigger a push, so two
        // auto-sharing nodes do not echo forever.
        if solicited && self.character.privacy_settings().auto_share {
            if let Err(e) = self.share_personality(peer_id).await {
                tracing::debug!(peer = %peer_id, "Auto-share skipped: {e}");
            }
        }
    }

    async fn handle_dialog_query(&self, peer_id: &str, env: &Envelope) {
        let Some(generator) = self.generator.as_ref() else {
            tracing::debug!(peer = %peer_id, "No response generator, ignoring dialog query");
            return;
        };
        let query: DialogQueryPayload = match env.decode_payload() {
            Ok(q) => q,
            Err(e) => {
                self.stats.inc_dropped_malformed();
                tracing::debug!(peer = %peer_id, "Bad dialog query: {e}");
                return;
            }
        };
        let response = match generator.generate(&query.context).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(peer = %peer_id, "Response generation failed: {e}");
                return;
            }
        };
        let reply = DialogReplyPayload { response };
        let sent = match self.typed_envelope(env.correlation_id, &reply) {
            Ok(out) => self.send_envelope(peer_id, &out).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!(peer = %peer_id, "Dialog reply failed: {e}");
        }
    }

    fn handle_dialog_reply(&self, peer_id: &str, env: &Envelope) {
        let reply: DialogReplyPayload = match env.decode_payload() {
            Ok(r) => r,
            Err(e) => {
                self.stats.inc_dropped_malformed();
                tracing::debug!(peer = %peer_id, "Bad dialog reply: {e}");
                return;
            }
        };
        let response = reply.response.from_peer(peer_id);
        if !self.wake(peer_id, env.correlation_id, MsgType::DialogReply, Reply::Dialog(response)) {
            tracing::debug!(peer = %peer_id, correlation_id = env.correlation_id, "Late or unsolicited dialog reply");
        }
    }

    fn handle_selection_announce(&self, peer_id: &str, env: &Envelope) {
        match env.decode_payload::<SelectionAnnouncePayload>() {
            Ok(a) => tracing::debug!(
                peer = %peer_id,
                trigger = %a.trigger,
                source = %a.source,
                score = a.score,
                "Peer announced selection",
            ),
            Err(e) => {
                self.stats.inc_dropped_malformed();
                tracing::debug!(peer = %peer_id, "Bad selection announce: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::{PrivacySettings, StaticCharacterStore, TemplateGenerator},
        transport::{Inbound, MemoryNetwork},
    };
    use tokio::sync::mpsc;

    fn traits() -> PersonalityTraits {
        PersonalityTraits::from_pairs([("shyness", 0.7), ("openness", 0.4), ("flirtiness", 0.9)])
    }

    fn manager(
        net: &MemoryNetwork,
        id: &str,
        privacy: PrivacySettings,
        settings: NodeSettings,
    ) -> (Arc<ProtocolManager>, mpsc::Receiver<Inbound>) {
        let identity = CompanionIdentity::generate(id);
        let (transport, rx) = net.join(id);
        let character = Arc::new(StaticCharacterStore::new(traits(), privacy));
        let cache = Arc::new(PersonalityCache::new(settings.cache_ttl, settings.initial_trust));
        let pm = ProtocolManager::new(&identity, Arc::new(transport), character, cache, settings)
            .with_generator(Arc::new(TemplateGenerator::builtin()));
        (Arc::new(pm), rx)
    }

    fn pump(pm: Arc<ProtocolManager>, mut rx: mpsc::Receiver<Inbound>) {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                pm.on_bytes(&msg.peer_id, &msg.bytes).await;
            }
        });
    }

    fn pair(privacy_b: PrivacySettings) -> (MemoryNetwork, Arc<ProtocolManager>, Arc<ProtocolManager>) {
        let net = MemoryNetwork::new();
        let (a, rx_a) = manager(&net, "mika", PrivacySettings::default(), NodeSettings::default());
        let (b, rx_b) = manager(&net, "yuki", privacy_b, NodeSettings::default());
        pump(a.clone(), rx_a);
        pump(b.clone(), rx_b);
        (net, a, b)
    }

    #[tokio::test]
    async fn personality_exchange_populates_cache() {
        let (_net, a, _b) = pair(PrivacySettings::default());
        let got = a.request_personality("yuki").await.unwrap();
        assert_eq!(got.traits, traits());
        assert_eq!(got.trust, 0.5);
        // Key pinned on this first contact.
        assert_eq!(got.confidence, TRUST_DELTA_PINNED);
        assert!(a.is_verified("yuki"));
        assert!(a.cache().get("yuki").is_some());
    }

    #[tokio::test]
    async fn full_precision_traits_reach_the_cache() {
        let net = MemoryNetwork::new();
        let (a, _rx) = manager(&net, "mika", PrivacySettings::default(), NodeSettings::default());
        let yuki = CompanionIdentity::generate("yuki");
        let precise = PersonalityTraits::from_pairs([
            ("shyness", 0.21849955565272294),
            ("openness", f64::EPSILON),
            ("agreeableness", 1.0 - f64::EPSILON),
        ]);
        let env = Envelope::build(
            MsgType::PersonalityResponse,
            "yuki",
            1,
            precise.clone(),
            None,
            now_micros(),
            &yuki.signing_key,
        );
        a.on_bytes("yuki", &env.to_json().unwrap()).await;

        assert_eq!(a.stats().snapshot().dropped_verification, 0);
        assert_eq!(a.cache().get("yuki").unwrap().traits, precise);
    }

    #[tokio::test]
    async fn second_request_is_rate_limited() {
        let (_net, a, _b) = pair(PrivacySettings::default());
        a.request_personality("yuki").await.unwrap();
        match a.send_personality_request("yuki").await {
            Err(NodeError::RateLimited(msg)) => assert!(msg.contains("retry in"), "{msg}"),
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(matches!(
            a.request_personality("yuki").await,
            Err(NodeError::RateLimited(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn private_peer_times_out() {
        let (_net, a, b) = pair(PrivacySettings::private());
        let err = a.request_personality("yuki").await.unwrap_err();
        assert!(matches!(err, NodeError::Timeout(_)));
        assert_eq!(a.stats().snapshot().timeouts, 1);
        assert_eq!(b.stats().snapshot().privacy_denied, 1);
        assert!(a.cache().get("yuki").is_none());
    }

    #[tokio::test]
    async fn privacy_denied_makes_no_network_call() {
        let net = MemoryNetwork::new();
        let (a, _rx_a) = manager(&net, "mika", PrivacySettings::private(), NodeSettings::default());
        let (_b, mut rx_b) = manager(&net, "yuki", PrivacySettings::default(), NodeSettings::default());
        let err = a.send_personality_response("yuki", 1, &traits()).await.unwrap_err();
        assert!(matches!(err, NodeError::PrivacyDenied(_)));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(a.stats().snapshot().sent, 0);
    }

    #[tokio::test]
    async fn shared_traits_filter_what_is_sent() {
        let privacy = PrivacySettings { shared_traits: vec!["shyness".into()], ..Default::default() };
        let (_net, a, _b) = pair(privacy);
        let got = a.request_personality("yuki").await.unwrap();
        assert_eq!(got.traits.len(), 1);
        assert_eq!(got.traits.get("shyness"), Some(0.7));
    }

    #[tokio::test]
    async fn tampered_frames_are_dropped_and_counted() {
        let net = MemoryNetwork::new();
        let (a, _rx) = manager(&net, "mika", PrivacySettings::default(), NodeSettings::default());
        let key = SigningKey::generate(&mut rand::rngs::OsRng);

        let mut env = Envelope::build(MsgType::PersonalityResponse, "yuki", 9, traits(), None, now_micros(), &key);
        env.personality_traits = PersonalityTraits::from_pairs([("shyness", 0.0)]);
        a.on_bytes("yuki", &env.to_json().unwrap()).await;

        a.on_bytes("yuki", b"{not json").await;

        // Sender id must match the session peer.
        let spoof = Envelope::build(MsgType::PersonalityResponse, "yuki", 9, traits(), None, now_micros(), &key);
        a.on_bytes("mallory", &spoof.to_json().unwrap()).await;

        let snap = a.stats().snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.dropped_verification, 2);
        assert_eq!(snap.dropped_malformed, 1);
        assert_eq!(snap.verified, 0);
        assert!(a.cache().is_empty());
        assert!(!a.is_verified("yuki"));
    }

    #[tokio::test]
    async fn pinned_key_rejects_impostor() {
        let net = MemoryNetwork::new();
        let (a, _rx) = manager(&net, "mika", PrivacySettings::default(), NodeSettings::default());
        let real = SigningKey::generate(&mut rand::rngs::OsRng);
        let fake = SigningKey::generate(&mut rand::rngs::OsRng);
        a.register_key("yuki", real.verifying_key());

        let env = Envelope::build(MsgType::PersonalityResponse, "yuki", 1, traits(), None, now_micros(), &fake);
        a.on_bytes("yuki", &env.to_json().unwrap()).await;
        assert!(a.cache().is_empty());

        let env = Envelope::build(MsgType::PersonalityResponse, "yuki", 1, traits(), None, now_micros(), &real);
        a.on_bytes("yuki", &env.to_json().unwrap()).await;
        let cached = a.cache().get("yuki").unwrap();
        assert_eq!(cached.confidence, TRUST_DELTA_KNOWN_KEY);
    }

    #[tokio::test]
    async fn unknown_key_dropped_without_tofu() {
        let net = MemoryNetwork::new();
        let settings = NodeSettings { trust_on_first_use: false, ..Default::default() };
        let (a, _rx) = manager(&net, "mika", PrivacySettings::default(), settings);
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let env = Envelope::build(MsgType::PersonalityResponse, "yuki", 1, traits(), None, now_micros(), &key);
        a.on_bytes("yuki", &env.to_json().unwrap()).await;
        assert_eq!(a.stats().snapshot().dropped_verification, 1);
    }

    #[tokio::test]
    async fn out_of_range_traits_are_clamped_with_lower_confidence() {
        let net = MemoryNetwork::new();
        let (a, _rx) = manager(&net, "mika", PrivacySettings::default(), NodeSettings::default());
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        a.register_key("yuki", key.verifying_key());

        let raw: PersonalityTraits = serde_json::from_str(r#"{"shyness":1.7}"#).unwrap();
        let env = Envelope::build(MsgType::PersonalityResponse, "yuki", 1, raw, None, now_micros(), &key);
        a.on_bytes("yuki", &env.to_json().unwrap()).await;
        let cached = a.cache().get("yuki").unwrap();
        assert_eq!(cached.traits.get("shyness"), Some(1.0));
        assert!((cached.confidence - 0.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn inbound_requests_are_throttled() {
        let net = MemoryNetwork::new();
        let (b, _rx_b) = manager(&net, "yuki", PrivacySettings::default(), NodeSettings::default());
        let (_a, mut rx_a) = net.join("mika");
        let key = SigningKey::generate(&mut rand::rngs::OsRng);

        for i in 0..3 {
            let env = Envelope::build(MsgType::PersonalityRequest, "mika", i, PersonalityTraits::new(), None, now_micros(), &key);
            b.on_bytes("mika", &env.to_json().unwrap()).await;
        }
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(b.stats().snapshot().dropped_rate_limited, 2);
    }

    #[tokio::test]
    async fn dialog_query_round_trip() {
        let (_net, a, _b) = pair(PrivacySettings::default());
        let ctx = DialogContext::new("feed", 60.0, now_micros());
        let reply = a.query_dialog("yuki", &ctx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.peer_id, "yuki");
        assert_eq!(reply.response.source.peer_id(), Some("yuki"));
        assert!(!reply.response.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_other_requests_intact() {
        let (net, a, _b) = pair(PrivacySettings::default());
        let (_c, _rx_c) = net.join("silent");
        net.set_silent("silent", true);
        let ctx = DialogContext::new("click", 50.0, now_micros());

        let (slow, fast) = tokio::join!(
            a.query_dialog("silent", &ctx, Duration::from_millis(200)),
            a.query_dialog("yuki", &ctx, Duration::from_secs(2)),
        );
        assert!(matches!(slow, Err(NodeError::Timeout(_))));
        assert!(fast.is_ok());
        assert!(a.pending().is_empty());
    }

    #[tokio::test]
    async fn auto_share_pushes_back_after_learning() {
        let net = MemoryNetwork::new();
        let auto = PrivacySettings { auto_share: true, ..Default::default() };
        let (a, rx_a) = manager(&net, "mika", auto, NodeSettings::default());
        let (b, rx_b) = manager(&net, "yuki", PrivacySettings::default(), NodeSettings::default());
        pump(a.clone(), rx_a);
        pump(b.clone(), rx_b);

        a.request_personality("yuki").await.unwrap();
        for _ in 0..50 {
            if b.cache().get("mika").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(b.cache().get("mika").unwrap().traits, traits());
    }

    #[tokio::test]
    async fn forget_drops_key_and_cache() {
        let (_net, a, _b) = pair(PrivacySettings::default());
        a.request_personality("yuki").await.unwrap();
        a.forget_peer("yuki");
        assert!(!a.is_verified("yuki"));
        assert!(a.cache().get("yuki").is_none());
    }
}
