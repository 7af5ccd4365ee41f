// ============================================================================
// Protocol constants
// ============================================================================

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

// --- Transport --------------------------------------------------------------

/// Maximum encoded envelope size in bytes (envelope + payload).
pub const MAX_MESSAGE_SIZE: usize = 65_536; // 64 KB

/// Acceptable clock skew between local and envelope timestamp (seconds).
pub const TIMESTAMP_TOLERANCE_SECS: u64 = 30;

/// Maximum length of a peer identifier on the wire.
pub const MAX_PEER_ID_LEN: usize = 128;

/// Maximum number of named traits accepted in one envelope.
pub const MAX_TRAITS: usize = 64;

/// Maximum length of a single trait name.
pub const MAX_TRAIT_NAME_LEN: usize = 64;

// --- Exchange ---------------------------------------------------------------

/// Personality cache entry lifetime (10 minutes).
pub const PERSONALITY_TTL_SECS: u64 = 600;

/// Per-peer cooldown between personality requests.
pub const REQUEST_COOLDOWN_SECS: u64 = 30;

/// Trust assigned to a peer on its first verified exchange.
pub const INITIAL_TRUST: f64 = 0.5;

/// Exponential smoothing factor applied to the previous trust value.
/// new = TRUST_HISTORY_WEIGHT * old + (1 - TRUST_HISTORY_WEIGHT) * delta
pub const TRUST_HISTORY_WEIGHT: f64 = 0.8;

// --- Selection --------------------------------------------------------------

/// Minimum score difference required to prefer a peer candidate over the
/// local one.
pub const TIE_EPSILON: f64 = 1e-6;

// --- Well-known trait names -------------------------------------------------

pub const TRAIT_SHYNESS: &str = "shyness";
pub const TRAIT_OPENNESS: &str = "openness";
pub const TRAIT_AGREEABLENESS: &str = "agreeableness";
pub const TRAIT_CONSCIENTIOUSNESS: &str = "conscientiousness";
pub const TRAIT_EMOTIONAL_STABILITY: &str = "emotional_stability";
pub const TRAIT_ROMANTICISM: &str = "romanticism";
pub const TRAIT_FLIRTINESS: &str = "flirtiness";

/// Source tag for locally generated dialog responses.
pub const LOCAL_SOURCE: &str = "local";
