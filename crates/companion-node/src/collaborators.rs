//! Interfaces to the rest of the companion: character data, telemetry and
//! dialog generation, plus the simple implementations the binary uses.

use async_trait::async_trait;
use companion_protocol::{DialogContext, DialogResponse, PersonalityTraits};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tokio::sync::mpsc;

use crate::{error::NodeError, scorer::ScoreBreakdown, time::now_micros};

// ============================================================================
// Character store
// ============================================================================

/// What the local companion is willing to reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    /// Opt-in switch for sending our personality at all.
    pub share_personality: bool,
    /// Traits to send. Empty sends all.
    #[serde(default)]
    pub shared_traits: Vec<String>,
    /// Push our personality after learning a peer's.
    #[serde(default)]
    pub auto_share: bool,
    /// Minimum trust a peer needs before we share with it.
    #[serde(default)]
    pub trust_level: f64,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self { share_personality: true, shared_traits: Vec::new(), auto_share: false, trust_level: 0.0 }
    }
}

impl PrivacySettings {
    pub fn private() -> Self {
        Self { share_personality: false, ..Self::default() }
    }

    /// Whether a peer at `peer_trust` may receive our personality.
    pub fn permits(&self, peer_trust: f64) -> bool {
        self.share_personality && peer_trust >= self.trust_level
    }
}

pub trait CharacterStore: Send + Sync {
    fn local_personality(&self) -> PersonalityTraits;
    fn privacy_settings(&self) -> PrivacySettings;
}

/// Fixed personality and privacy settings.
#[derive(Debug, Clone, Default)]
pub struct StaticCharacterStore {
    traits: PersonalityTraits,
    privacy: PrivacySettings,
}

impl StaticCharacterStore {
    pub fn new(traits: PersonalityTraits, privacy: PrivacySettings) -> Self {
        Self { traits, privacy }
    }

    /// Load traits from a JSON object such as `{"shyness": 0.7}`.
    pub fn from_json_file(path: &Path, privacy: PrivacySettings) -> Result<Self, NodeError> {
        let raw = std::fs::read(path)
            .map_err(|e| NodeError::InvalidPersonality(format!("{}: {e}", path.display())))?;
        let traits: PersonalityTraits = serde_json::from_slice(&raw)
            .map_err(|e| NodeError::InvalidPersonality(format!("{}: {e}", path.display())))?;
        Ok(Self::new(traits, privacy))
    }
}

impl CharacterStore for StaticCharacterStore {
    fn local_personality(&self) -> PersonalityTraits {
        self.traits.clone()
    }

    fn privacy_settings(&self) -> PrivacySettings {
        self.privacy.clone()
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Learning / telemetry sink. Must return promptly.
pub trait TelemetrySink: Send + Sync {
    fn record_selection(&self, context: &DialogContext, winner: &DialogResponse, breakdown: &ScoreBreakdown);
}

/// Emits one structured `info!` event per selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record_selection(&self, context: &DialogContext, winner: &DialogResponse, breakdown: &ScoreBreakdown) {
        tracing::info!(
            trigger = %context.trigger,
            source = %winner.source,
            total = breakdown.total,
            personality = breakdown.personality,
            flow = breakdown.flow,
            tone = breakdown.tone,
            "Dialog response selected",
        );
    }
}

/// A recorded selection, as delivered by [`ChannelTelemetry`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRecord {
    pub trigger: String,
    pub winner: DialogResponse,
    pub breakdown: ScoreBreakdown,
}

/// Forwards selections over an unbounded channel.
pub struct ChannelTelemetry {
    tx: mpsc::UnboundedSender<SelectionRecord>,
}

impl ChannelTelemetry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SelectionRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn record_selection(&self, context: &DialogContext, winner: &DialogResponse, breakdown: &ScoreBreakdown) {
        // A closed receiver just means nobody is listening.
        let _ = self.tx.send(SelectionRecord {
            trigger: context.trigger.clone(),
            winner: winner.clone(),
            breakdown: *breakdown,
        });
    }
}

// ============================================================================
// Response generation (peer side of DialogQuery)
// ============================================================================

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, context: &DialogContext) -> Result<DialogResponse, NodeError>;
}

const FALLBACK_LINES: &[&str] = &[
    "I'm thinking about that...",
    "Let me consider that...",
    "That's interesting...",
];

const TEMPLATE_CONFIDENCE: f64 = 0.8;
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Trigger → canned lines. Rotates through the lines by history length.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    templates: HashMap<String, Vec<(String, String)>>,
}

impl TemplateGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line(mut self, trigger: &str, text: &str, animation: &str) -> Self {
        self.templates
            .entry(trigger.to_string())
            .or_default()
            .push((text.to_string(), animation.to_string()));
        self
    }

    /// A small built-in set covering the common triggers.
    pub fn builtin() -> Self {
        Self::new()
            .with_line("click", "Oh! Hi there!", "talking")
            .with_line("click", "You poked me... again?", "surprised")
            .with_line("feed", "Yum, thank you!", "happy")
            .with_line("feed", "Is this for me? You're so sweet.", "blush")
            .with_line("compliment", "W-what? You really think so?", "blush")
            .with_line("compliment", "That made my whole day!", "happy")
            .with_line("play", "Let's go! I'm so excited!", "happy")
            .with_line("pet", "Mmm... that's nice.", "idle")
    }
}

#[async_trait]
impl ResponseGenerator for TemplateGenerator {
    async fn generate(&self, context: &DialogContext) -> Result<DialogResponse, NodeError> {
        let now = now_micros();
        let pick = context.history.len();
        let mut response = match self.templates.get(&context.trigger).filter(|l| !l.is_empty()) {
            Some(lines) => {
                let (text, animation) = &lines[pick % lines.len()];
                DialogResponse::local(text.as_str(), animation.as_str(), now)
            }
            None => DialogResponse::local(FALLBACK_LINES[pick % FALLBACK_LINES.len()], "talking", now),
        };
        response.confidence = if self.templates.contains_key(&context.trigger) {
            TEMPLATE_CONFIDENCE
        } else {
            FALLBACK_CONFIDENCE
        };
        Ok(response)
    }
}
