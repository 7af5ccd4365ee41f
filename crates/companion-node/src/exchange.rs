use async_trait::async_trait;
use companion_protocol::{
    constants::{
        TRAIT_AGREEABLENESS, TRAIT_CONSCIENTIOUSNESS, TRAIT_EMOTIONAL_STABILITY, TRAIT_FLIRTINESS,
        TRAIT_OPENNESS, TRAIT_ROMANTICISM, TRAIT_SHYNESS,
    },
    PersonalityTraits,
};
use std::{collections::BTreeMap, sync::Arc};

use crate::{cache::PersonalityCache, protocol::ProtocolManager};

// ============================================================================
// Resolution types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Network,
    Inference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPersonality {
    pub traits: PersonalityTraits,
    /// 0 for guessed data, > 0 for verified exchanges.
    pub confidence: f64,
    pub source: ResolutionSource,
}

pub enum Resolution {
    Resolved(ResolvedPersonality),
    /// Let the next resolver try.
    Defer,
}

/// One stage of the cache → network → inference pipeline.
#[async_trait]
pub trait PersonalityResolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(&self, peer_id: &str) -> Resolution;
}

// ============================================================================
// Resolvers
// ============================================================================

/// Live cache entries only; no network I/O.
pub struct CacheResolver {
    cache: Arc<PersonalityCache>,
}

impl CacheResolver {
    pub fn new(cache: Arc<PersonalityCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PersonalityResolver for CacheResolver {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn resolve(&self, peer_id: &str) -> Resolution {
        match self.cache.get(peer_id) {
            Some(entry) => Resolution::Resolved(ResolvedPersonality {
                traits: entry.traits,
                confidence: entry.confidence,
                source: ResolutionSource::Cache,
            }),
            None => Resolution::Defer,
        }
    }
}

/// Bounded personality request through the protocol manager.
/// Rate limiting, privacy refusals and timeouts all defer.
pub struct NetworkResolver {
    protocol: Arc<ProtocolManager>,
}

impl NetworkResolver {
    pub fn new(protocol: Arc<ProtocolManager>) -> Self {
        Self { protocol }
    }
}

#[async_trait]
impl PersonalityResolver for NetworkResolver {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn resolve(&self, peer_id: &str) -> Resolution {
        match self.protocol.request_personality(peer_id).await {
            Ok(entry) => Resolution::Resolved(ResolvedPersonality {
                traits: entry.traits,
                confidence: entry.confidence,
                source: ResolutionSource::Network,
            }),
            Err(e) => {
                tracing::debug!(peer = %peer_id, "Personality fetch gave no data: {e}");
                Resolution::Defer
            }
        }
    }
}

/// Last-resort guess from the peer identifier. Never cached.
#[derive(Debug, Default, Clone, Copy)]
pub struct InferenceResolver;

const BASELINE: f64 = 0.5;
const HINTED: f64 = 0.8;

/// Identifier fragments and the trait they hint at.
const ID_HINTS: &[(&str, &str)] = &[
    ("shy", TRAIT_SHYNESS),
    ("quiet", TRAIT_SHYNESS),
    ("tsun", TRAIT_SHYNESS),
    ("curious", TRAIT_OPENNESS),
    ("explor", TRAIT_OPENNESS),
    ("kind", TRAIT_AGREEABLENESS),
    ("friend", TRAIT_AGREEABLENESS),
    ("sweet", TRAIT_AGREEABLENESS),
    ("tidy", TRAIT_CONSCIENTIOUSNESS),
    ("calm", TRAIT_EMOTIONAL_STABILITY),
    ("zen", TRAIT_EMOTIONAL_STABILITY),
    ("romantic", TRAIT_ROMANTICISM),
    ("love", TRAIT_ROMANTICISM),
    ("flirt", TRAIT_FLIRTINESS),
];

impl InferenceResolver {
    pub fn infer(peer_id: &str) -> ResolvedPersonality {
        let mut traits: BTreeMap<&str, f64> = [
            TRAIT_SHYNESS,
            TRAIT_OPENNESS,
            TRAIT_AGREEABLENESS,
            TRAIT_CONSCIENTIOUSNESS,
            TRAIT_EMOTIONAL_STABILITY,
        ]
        .into_iter()
        .map(|t| (t, BASELINE))
        .collect();

        let id = peer_id.to_ascii_lowercase();
        for &(fragment, name) in ID_HINTS {
            if id.contains(fragment) {
                traits.insert(name, HINTED);
            }
        }

        ResolvedPersonality {
            traits: PersonalityTraits::from_pairs(traits),
            confidence: 0.0,
            source: ResolutionSource::Inference,
        }
    }
}

#[async_trait]
impl PersonalityResolver for InferenceResolver {
    fn name(&self) -> &'static str {
        "inference"
    }

    async fn resolve(&self, peer_id: &str) -> Resolution {
        Resolution::Resolved(Self::infer(peer_id))
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Runs resolvers in order until one produces a personality.
pub struct ExchangeCoordinator {
    resolvers: Vec<Box<dyn PersonalityResolver>>,
}

impl ExchangeCoordinator {
    /// cache → network → inference
    pub fn new(protocol: Arc<ProtocolManager>) -> Self {
        let cache = Arc::clone(protocol.cache());
        let resolvers: Vec<Box<dyn PersonalityResolver>> = vec![
            Box::new(CacheResolver::new(cache)) as Box<dyn PersonalityResolver>,
            Box::new(NetworkResolver::new(protocol)),
            Box::new(InferenceResolver),
        ];
        Self::with_resolvers(resolvers)
    }

    pub fn with_resolvers(resolvers: Vec<Box<dyn PersonalityResolver>>) -> Self {
        Self { resolvers }
    }

    /// Always produces a personality; inference backs every pipeline.
    pub async fn get_personality(&self, peer_id: &str) -> ResolvedPersonality {
        for resolver in &self.resolvers {
            if let Resolution::Resolved(p) = resolver.resolve(peer_id).await {
                tracing::trace!(peer = %peer_id, resolver = resolver.name(), confidence = p.confidence, "Personality resolved");
                return p;
            }
        }
        InferenceResolver::infer(peer_id)
    }
}
