use clap::Parser;
use companion_protocol::{
    constants::{
        INITIAL_TRUST, PERSONALITY_TTL_SECS, REQUEST_COOLDOWN_SECS, TIE_EPSILON,
        TIMESTAMP_TOLERANCE_SECS,
    },
    validate_peer_id,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{collaborators::PrivacySettings, error::NodeError};

// ============================================================================
// Runtime settings (library-facing)
// ============================================================================

/// How the dialog backend picks among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePriority {
    /// Multi-factor personality / flow / tone scorer.
    #[default]
    Personality,
    /// Highest generator-reported confidence.
    Confidence,
    /// First non-empty candidate, local first.
    First,
    /// Uniform over non-empty candidates.
    Random,
}

impl FromStr for ResponsePriority {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "personality" => Ok(Self::Personality),
            "confidence" => Ok(Self::Confidence),
            "first" => Ok(Self::First),
            "random" => Ok(Self::Random),
            other => Err(NodeError::InvalidConfig(format!("unknown response priority '{other}'"))),
        }
    }
}

impl std::fmt::Display for ResponsePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Personality => "personality",
            Self::Confidence => "confidence",
            Self::First => "first",
            Self::Random => "random",
        };
        f.write_str(s)
    }
}

/// Tunables handed to the library components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub cache_ttl: Duration,
    pub initial_trust: f64,
    pub rate_limit_cooldown: Duration,
    /// Wait budget for a single personality exchange.
    pub exchange_timeout: Duration,
    /// Wait budget for the whole dialog fan-out.
    pub fanout_timeout: Duration,
    pub tie_epsilon: f64,
    pub timestamp_tolerance: Duration,
    /// Minimum spacing between two network fan-outs.
    pub coordination_cooldown: Duration,
    pub min_peers: usize,
    pub response_priority: ResponsePriority,
    /// Pin a sender's key on first verified contact.
    pub trust_on_first_use: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(PERSONALITY_TTL_SECS),
            initial_trust: INITIAL_TRUST,
            rate_limit_cooldown: Duration::from_secs(REQUEST_COOLDOWN_SECS),
            exchange_timeout: Duration::from_secs(3),
            fanout_timeout: Duration::from_millis(1_500),
            tie_epsilon: TIE_EPSILON,
            timestamp_tolerance: Duration::from_secs(TIMESTAMP_TOLERANCE_SECS),
            coordination_cooldown: Duration::from_secs(1),
            min_peers: 1,
            response_priority: ResponsePriority::Personality,
            trust_on_first_use: true,
        }
    }
}

impl NodeSettings {
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.cache_ttl.is_zero() {
            return Err(NodeError::InvalidConfig("cache_ttl must be non-zero".into()));
        }
        if self.exchange_timeout.is_zero() || self.fanout_timeout.is_zero() {
            return Err(NodeError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.initial_trust) {
            return Err(NodeError::InvalidConfig(format!(
                "initial_trust {} outside [0, 1]",
                self.initial_trust
            )));
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon < 0.0 {
            return Err(NodeError::InvalidConfig(format!(
                "tie_epsilon {} must be a non-negative number",
                self.tie_epsilon
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Binary configuration
// ============================================================================

/// A statically configured peer: `id=host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub id: String,
    pub addr: SocketAddr,
}

impl FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('=')
            .ok_or_else(|| format!("expected id=host:port, got '{s}'"))?;
        validate_peer_id(id).map_err(|e| e.to_string())?;
        let addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("bad address '{addr}': {e}"))?;
        Ok(Self { id: id.to_string(), addr })
    }
}

#[derive(Parser, Debug)]
#[command(name = "companion-node", about = "Personality-aware companion dialog node")]
pub struct Config {
    /// This node's peer identifier on the network.
    #[arg(long, env = "COMPANION_PEER_ID", default_value = "companion")]
    pub peer_id: String,

    /// TCP listen address for inbound envelopes.
    #[arg(long, env = "COMPANION_LISTEN_ADDR", default_value = "127.0.0.1:7700")]
    pub listen_addr: SocketAddr,

    /// Static peers, `id=host:port` (can repeat).
    #[arg(long = "peer", env = "COMPANION_PEERS", value_delimiter = ',')]
    pub peers: Vec<PeerAddr>,

    /// Path to the 32-byte Ed25519 secret key file.
    #[arg(long, env = "COMPANION_KEYPAIR_PATH", default_value = "companion-identity.key")]
    pub keypair_path: PathBuf,

    /// JSON file with this companion's traits, e.g. {"shyness":0.7}.
    #[arg(long, env = "COMPANION_PERSONALITY")]
    pub personality_path: Option<PathBuf>,

    /// Never send our personality to anyone.
    #[arg(long, env = "COMPANION_NO_SHARE", default_value_t = false)]
    pub no_share: bool,

    /// Only share these traits (can repeat). Empty shares all.
    #[arg(long = "shared-trait", env = "COMPANION_SHARED_TRAITS", value_delimiter = ',')]
    pub shared_traits: Vec<String>,

    /// Push our personality to a peer after learning theirs.
    #[arg(long, env = "COMPANION_AUTO_SHARE", default_value_t = false)]
    pub auto_share: bool,

    /// Minimum trust a peer needs before we share with it.
    #[arg(long, env = "COMPANION_TRUST_LEVEL", default_value_t = 0.0)]
    pub trust_level: f64,

    #[arg(long, env = "COMPANION_EXCHANGE_TIMEOUT_MS", default_value_t = 3_000)]
    pub exchange_timeout_ms: u64,

    #[arg(long, env = "COMPANION_FANOUT_TIMEOUT_MS", default_value_t = 1_500)]
    pub fanout_timeout_ms: u64,

    #[arg(long, env = "COMPANION_CACHE_TTL_SECS", default_value_t = PERSONALITY_TTL_SECS)]
    pub cache_ttl_secs: u64,

    #[arg(long, env = "COMPANION_RATE_LIMIT_SECS", default_value_t = REQUEST_COOLDOWN_SECS)]
    pub rate_limit_secs: u64,

    /// Interval of the expired-cache sweep.
    #[arg(long, env = "COMPANION_PURGE_INTERVAL_SECS", default_value_t = 60)]
    pub purge_interval_secs: u64,

    /// personality | confidence | first | random
    #[arg(long, env = "COMPANION_RESPONSE_PRIORITY", default_value = "personality")]
    pub response_priority: String,

    /// Below this many peers the node answers locally.
    #[arg(long, env = "COMPANION_MIN_PEERS", default_value_t = 1)]
    pub min_peers: usize,

    /// Require keys to be registered out of band (no trust on first use).
    #[arg(long, env = "COMPANION_NO_TOFU", default_value_t = false)]
    pub no_tofu: bool,
}

impl Config {
    /// Runtime settings derived from the command line.
    pub fn settings(&self) -> Result<NodeSettings, NodeError> {
        let settings = NodeSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_secs),
            exchange_timeout: Duration::from_millis(self.exchange_timeout_ms),
            fanout_timeout: Duration::from_millis(self.fanout_timeout_ms),
            min_peers: self.min_peers,
            response_priority: self.response_priority.parse()?,
            trust_on_first_use: !self.no_tofu,
            ..NodeSettings::default()
        };
        settings.validate()?;
        validate_peer_id(&self.peer_id)?;
        Ok(settings)
    }

    pub fn privacy(&self) -> PrivacySettings {
        PrivacySettings {
            share_personality: !self.no_share,
            shared_traits: self.shared_traits.clone(),
            auto_share: self.auto_share,
            trust_level: self.trust_level.clamp(0.0, 1.0),
        }
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}
