use companion_protocol::{validate_peer_id, DialogContext, DialogResponse, SelectionAnnouncePayload};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;

use crate::{
    collaborators::{CharacterStore, TelemetrySink},
    config::{NodeSettings, ResponsePriority},
    error::NodeError,
    exchange::{ExchangeCoordinator, InferenceResolver, ResolvedPersonality},
    protocol::{PeerDialogResponse, ProtocolManager},
    scorer::{select_winner, ResponseScorer, ScoreBreakdown, ScoredCandidate},
};

/// Picks the best dialog response among the local candidate and whatever
/// peers return within the fan-out budget.
///
/// Network trouble only ever reduces the candidate set; the local response
/// is always available as the answer.
pub struct NetworkDialogBackend {
    protocol: Arc<ProtocolManager>,
    exchange: ExchangeCoordinator,
    character: Arc<dyn CharacterStore>,
    telemetry: Arc<dyn TelemetrySink>,
    scorer: ResponseScorer,
    settings: NodeSettings,
    last_coordination: Mutex<Option<Instant>>,
    announce: bool,
}

impl NetworkDialogBackend {
    pub fn new(
        protocol: Arc<ProtocolManager>,
        character: Arc<dyn CharacterStore>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let settings = protocol.settings().clone();
        Self {
            exchange: ExchangeCoordinator::new(Arc::clone(&protocol)),
            protocol,
            character,
            telemetry,
            scorer: ResponseScorer::default(),
            settings,
            last_coordination: Mutex::new(None),
            announce: true,
        }
    }

    /// Toggle the SELECTION_ANNOUNCE broadcast after each networked round.
    pub fn with_announcements(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub fn scorer(&self) -> &ResponseScorer {
        &self.scorer
    }

    /// Select the response to show for `context`.
    ///
    /// Errors only on bad local configuration (e.g. malformed personality).
    pub async fn select_best_response(
        &self,
        context: &DialogContext,
        local: DialogResponse,
        peer_ids: &[String],
    ) -> Result<DialogResponse, NodeError> {
        let own = self
            .character
            .local_personality()
            .sanitize()
            .map_err(|e| NodeError::InvalidPersonality(e.to_string()))?;
        if own.clamped > 0 {
            return Err(NodeError::InvalidPersonality(format!(
                "{} trait value(s) outside [0, 1]",
                own.clamped
            )));
        }

        let mut candidates = vec![ScoredCandidate {
            breakdown: self.scorer.score(context, &local, &own.traits, 1.0),
            response: local,
        }];

        let peers = self.reachable_peers(peer_ids);
        let mut queried = Vec::new();
        if self.should_coordinate(peers.len()) {
            for (reply, persona) in self.fan_out(context, &peers).await {
                tracing::trace!(
                    peer = %reply.peer_id,
                    latency_ms = reply.latency.as_millis() as u64,
                    confidence = persona.confidence,
                    "Peer candidate received",
                );
                let breakdown = self.scorer.score(context, &reply.response, &persona.traits, persona.confidence);
                queried.push(reply.peer_id);
                candidates.push(ScoredCandidate { response: reply.response, breakdown });
            }
        }

        for c in &candidates {
            tracing::trace!(source = %c.response.source, total = c.breakdown.total, "Candidate score");
        }

        let winner = self.pick(&candidates);
        self.telemetry.record_selection(context, &winner.response, &winner.breakdown);
        if self.announce && !queried.is_empty() {
            self.spawn_announce(context, &winner.response, &winner.breakdown, queried);
        }
        Ok(winner.response.clone())
    }

    /// Distinct, well-formed peer ids other than ourselves, sorted.
    fn reachable_peers(&self, peer_ids: &[String]) -> Vec<String> {
        let me = self.protocol.local_peer_id();
        peer_ids
            .iter()
            .filter(|p| p.as_str() != me && validate_peer_id(p).is_ok())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether to start a network round now. Records the round if so.
    fn should_coordinate(&self, peer_count: usize) -> bool {
        if peer_count == 0 || peer_count < self.settings.min_peers {
            tracing::debug!(peer_count, min_peers = self.settings.min_peers, "Too few peers, selecting locally");
            return false;
        }
        let mut last = self.last_coordination.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.settings.coordination_cooldown {
                tracing::debug!("Coordination cooldown active, selecting locally");
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Query every peer concurrently. Each peer gets the same deadline; the
    /// personality lookup runs alongside the dialog query and falls back to
    /// inference if it misses the deadline.
    async fn fan_out(
        &self,
        context: &DialogContext,
        peers: &[String],
    ) -> Vec<(PeerDialogResponse, ResolvedPersonality)> {
        let budget = self.settings.fanout_timeout;
        let deadline = Instant::now() + budget;

        let tasks = peers.iter().map(|peer| async move {
            let (reply, persona) = tokio::join!(
                self.protocol.query_dialog(peer, context, budget),
                tokio::time::timeout_at(deadline, self.exchange.get_personality(peer)),
            );
            let reply = match reply {
                Ok(r) if !r.response.is_empty() => r,
                Ok(_) => {
                    tracing::debug!(peer = %peer, "Peer sent an empty response");
                    return None;
                }
                Err(e) if e.is_soft() => {
                    tracing::debug!(peer = %peer, "No dialog candidate: {e}");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, "Dialog query failed: {e}");
                    return None;
                }
            };
            let persona = persona.unwrap_or_else(|_| InferenceResolver::infer(peer));
            Some((reply, persona))
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    fn pick<'a>(&self, candidates: &'a [ScoredCandidate]) -> &'a ScoredCandidate {
        let local = &candidates[0];
        let usable: Vec<&ScoredCandidate> = candidates.iter().filter(|c| !c.response.is_empty()).collect();

        let chosen = match self.settings.response_priority {
            ResponsePriority::Personality => select_winner(candidates, self.settings.tie_epsilon),
            ResponsePriority::Confidence => usable.iter().copied().max_by(|a, b| {
                a.response
                    .confidence
                    .total_cmp(&b.response.confidence)
                    // Local first, then lower peer id.
                    .then_with(|| b.response.source.cmp(&a.response.source))
            }),
            ResponsePriority::First => usable.first().copied(),
            ResponsePriority::Random => usable.choose(&mut rand::thread_rng()).copied(),
        };
        chosen.unwrap_or(local)
    }

    fn spawn_announce(
        &self,
        context: &DialogContext,
        winner: &DialogResponse,
        breakdown: &ScoreBreakdown,
        peers: Vec<String>,
    ) {
        let announce = SelectionAnnouncePayload {
            trigger: context.trigger.clone(),
            text: winner.text.clone(),
            source: winner.source.clone(),
            score: breakdown.total,
        };
        let protocol = Arc::clone(&self.protocol);
        tokio::spawn(async move {
            for peer in peers {
                if let Err(e) = protocol.announce_selection(&peer, &announce).await {
                    tracing::debug!(peer = %peer, "Selection announce failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::{
            ChannelTelemetry, PrivacySettings, ResponseGenerator, SelectionRecord, StaticCharacterStore,
        },
        identity::CompanionIdentity,
        cache::PersonalityCache,
        transport::MemoryNetwork,
    };
    use async_trait::async_trait;
    use companion_protocol::{InteractionRecord, PersonalityTraits, ResponseSource};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FixedLine(&'static str);

    #[async_trait]
    impl ResponseGenerator for FixedLine {
        async fn generate(&self, _: &DialogContext) -> Result<DialogResponse, NodeError> {
            let mut r = DialogResponse::local(self.0, "talking", crate::time::now_micros());
            r.confidence = 0.9;
            Ok(r)
        }
    }

    fn shy() -> PersonalityTraits {
        PersonalityTraits::from_pairs([("shyness", 0.8), ("openness", 0.4), ("agreeableness", 0.6)])
    }

    fn spawn_peer(net: &MemoryNetwork, id: &str, line: &'static str, privacy: PrivacySettings) -> Arc<ProtocolManager> {
        let settings = NodeSettings::default();
        let identity = CompanionIdentity::generate(id);
        let (transport, mut rx) = net.join(id);
        let cache = Arc::new(PersonalityCache::new(settings.cache_ttl, settings.initial_trust));
        let store = Arc::new(StaticCharacterStore::new(shy(), privacy));
        let pm = Arc::new(
            ProtocolManager::new(&identity, Arc::new(transport), store, cache, settings)
                .with_generator(Arc::new(FixedLine(line))),
        );
        let handler = Arc::clone(&pm);
        tokio::spawn(async move {
            while let Some(m) = rx.recv().await {
                handler.on_bytes(&m.peer_id, &m.bytes).await;
            }
        });
        pm
    }

    struct Harness {
        net: MemoryNetwork,
        protocol: Arc<ProtocolManager>,
        backend: NetworkDialogBackend,
        selections: mpsc::UnboundedReceiver<SelectionRecord>,
    }

    fn harness(settings: NodeSettings, traits: PersonalityTraits) -> Harness {
        let net = MemoryNetwork::new();
        let identity = CompanionIdentity::generate("mika");
        let (transport, mut rx) = net.join("mika");
        let cache = Arc::new(PersonalityCache::new(settings.cache_ttl, settings.initial_trust));
        let store: Arc<dyn CharacterStore> = Arc::new(StaticCharacterStore::new(traits, PrivacySettings::default()));
        let protocol = Arc::new(ProtocolManager::new(&identity, Arc::new(transport), Arc::clone(&store), cache, settings));
        let handler = Arc::clone(&protocol);
        tokio::spawn(async move {
            while let Some(m) = rx.recv().await {
                handler.on_bytes(&m.peer_id, &m.bytes).await;
            }
        });
        let (telemetry, selections) = ChannelTelemetry::new();
        let backend = NetworkDialogBackend::new(Arc::clone(&protocol), store, Arc::new(telemetry));
        Harness { net, protocol, backend, selections }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn local_line(text: &str) -> DialogResponse {
        DialogResponse::local(text, "talking", crate::time::now_micros())
    }

    #[tokio::test(start_paused = true)]
    async fn no_peers_returns_local_immediately() {
        let mut h = harness(NodeSettings::default(), shy());
        let ctx = DialogContext::new("click", 50.0, 0);
        let started = Instant::now();
        let got = h.backend.select_best_response(&ctx, local_line("Oh, hi."), &[]).await.unwrap();
        assert!(got.source.is_local());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(h.protocol.stats().snapshot().sent, 0);
        assert!(h.selections.try_recv().unwrap().winner.source.is_local());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_peers_degrade_to_local_within_budget() {
        let h = harness(NodeSettings::default(), shy());
        let (_a, _rx_a) = h.net.join("ghost");
        h.net.set_silent("ghost", true);
        h.net.set_unreachable("gone", true);

        let ctx = DialogContext::new("click", 50.0, 0);
        let started = Instant::now();
        let got = h
            .backend
            .select_best_response(&ctx, local_line("Oh, hi."), &ids(&["ghost", "gone"]))
            .await
            .unwrap();
        assert!(got.source.is_local());
        assert!(started.elapsed() <= NodeSettings::default().fanout_timeout);
    }

    #[tokio::test]
    async fn fresher_peer_line_beats_repeated_local_line() {
        let mut h = harness(NodeSettings::default(), shy());
        spawn_peer(&h.net, "yuki", "Did you bring me a snack? You are so sweet!", PrivacySettings::default());

        let mut ctx = DialogContext::new("feed", 80.0, 0);
        ctx.relationship_level = "friend".into();
        ctx.push_history(InteractionRecord {
            trigger: "feed".into(),
            response: "Thanks.".into(),
            animation: "idle".into(),
            source: ResponseSource::Local,
            timestamp: 0,
        });

        let got = h
            .backend
            .select_best_response(&ctx, local_line("Thanks."), &ids(&["yuki"]))
            .await
            .unwrap();
        assert_eq!(got.source.peer_id(), Some("yuki"));
        let record = h.selections.recv().await.unwrap();
        assert_eq!(record.winner, got);
        assert!(record.breakdown.total > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn inferred_personality_never_outweighs_local_on_equal_lines() {
        let h = harness(NodeSettings::default(), shy());
        let line = "Mm, thank you.";
        // Peer answers dialog but refuses to share its personality.
        spawn_peer(&h.net, "yuki", line, PrivacySettings::private());
        // An old, long-expired cache entry.
        h.protocol.cache().store_at("yuki", shy(), 1.0, 0);

        let ctx = DialogContext::new("feed", 60.0, 0);
        let got = h
            .backend
            .select_best_response(&ctx, local_line(line), &ids(&["yuki"]))
            .await
            .unwrap();
        assert!(got.source.is_local());

        let inferred = InferenceResolver::infer("yuki");
        assert_eq!(inferred.confidence, 0.0);
        let peer = local_line(line).from_peer("yuki");
        let peer_score = h.backend.scorer().score(&ctx, &peer, &inferred.traits, inferred.confidence);
        let local_score = h.backend.scorer().score(&ctx, &local_line(line), &shy(), 1.0);
        assert_eq!(peer_score.personality, 0.0);
        assert!(peer_score.personality <= local_score.personality);
        assert!(peer_score.total <= local_score.total);
    }

    #[tokio::test]
    async fn coordination_cooldown_skips_second_round() {
        let h = harness(NodeSettings::default(), shy());
        spawn_peer(&h.net, "yuki", "Hello!", PrivacySettings::default());
        let ctx = DialogContext::new("click", 50.0, 0);

        h.backend.select_best_response(&ctx, local_line("Hi."), &ids(&["yuki"])).await.unwrap();
        let sent = h.protocol.stats().snapshot().sent;
        assert!(sent > 0);
        let got = h.backend.select_best_response(&ctx, local_line("Hi."), &ids(&["yuki"])).await.unwrap();
        assert!(got.source.is_local());
        // Nothing new beyond the announce that may still be in flight.
        tokio::task::yield_now().await;
        let after = h.protocol.stats().snapshot().sent;
        assert!(after <= sent + 1);
    }

    #[tokio::test]
    async fn below_min_peers_stays_local() {
        let settings = NodeSettings { min_peers: 2, ..Default::default() };
        let h = harness(settings, shy());
        spawn_peer(&h.net, "yuki", "Hello!", PrivacySettings::default());
        let ctx = DialogContext::new("click", 50.0, 0);
        let got = h
            .backend
            .select_best_response(&ctx, local_line("Hi."), &ids(&["yuki", "mika", "yuki"]))
            .await
            .unwrap();
        assert!(got.source.is_local());
        assert_eq!(h.protocol.stats().snapshot().sent, 0);
    }

    #[tokio::test]
    async fn confidence_priority_prefers_surer_generator() {
        let settings = NodeSettings { response_priority: ResponsePriority::Confidence, ..Default::default() };
        let h = harness(settings, shy());
        spawn_peer(&h.net, "yuki", "Hello!", PrivacySettings::default());
        let ctx = DialogContext::new("click", 50.0, 0);
        let mut local = local_line("Hi.");
        local.confidence = 0.5;
        let got = h.backend.select_best_response(&ctx, local, &ids(&["yuki"])).await.unwrap();
        assert_eq!(got.source.peer_id(), Some("yuki"));
    }

    #[tokio::test]
    async fn announcements_can_be_disabled() {
        let mut h = harness(NodeSettings::default(), shy());
        h.backend = h.backend.with_announcements(false);
        let yuki = spawn_peer(&h.net, "yuki", "Hello!", PrivacySettings::default());
        let ctx = DialogContext::new("click", 50.0, 0);
        h.backend.select_best_response(&ctx, local_line("Hi."), &ids(&["yuki"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Query plus personality request, nothing more.
        assert_eq!(h.protocol.stats().snapshot().sent, 2);
        assert_eq!(yuki.stats().snapshot().received, 2);
    }

    #[tokio::test]
    async fn first_priority_keeps_non_empty_local() {
        let settings = NodeSettings { response_priority: ResponsePriority::First, ..Default::default() };
        let h = harness(settings, shy());
        spawn_peer(&h.net, "yuki", "Hello!", PrivacySettings::default());
        let ctx = DialogContext::new("click", 50.0, 0);
        let got = h.backend.select_best_response(&ctx, local_line("Hi."), &ids(&["yuki"])).await.unwrap();
        assert!(got.source.is_local());
    }

    #[tokio::test]
    async fn malformed_local_personality_is_an_error() {
        let raw: PersonalityTraits = serde_json::from_str(r#"{"shyness":3.0}"#).unwrap();
        let h = harness(NodeSettings::default(), raw);
        let ctx = DialogContext::new("click", 50.0, 0);
        let err = h.backend.select_best_response(&ctx, local_line("Hi."), &[]).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidPersonality(_)));
        assert!(err.is_config());
    }
}
