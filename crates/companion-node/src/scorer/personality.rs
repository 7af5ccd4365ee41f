//! Personality-compatibility sub-score.

use companion_protocol::{
    constants::{
        TRAIT_AGREEABLENESS, TRAIT_CONSCIENTIOUSNESS, TRAIT_EMOTIONAL_STABILITY, TRAIT_FLIRTINESS,
        TRAIT_OPENNESS, TRAIT_ROMANTICISM, TRAIT_SHYNESS,
    },
    DialogResponse, PersonalityTraits,
};

use super::weights::TraitWeights;

/// Response length at which the length heuristics saturate.
const LENGTH_NORM: f64 = 200.0;

/// Coarse class of the trigger that started the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Affectionate or personal attention (compliment, hug, flirt...).
    Intimate,
    /// Caretaking (feed, play, pet...).
    Care,
    /// Everything else (click, idle...).
    Casual,
}

impl TriggerKind {
    pub fn classify(trigger: &str) -> Self {
        match trigger.to_ascii_lowercase().as_str() {
            "compliment" | "hug" | "kiss" | "flirt" | "romance" | "gift" | "confess" => Self::Intimate,
            "feed" | "play" | "pet" | "heal" | "clean" | "rest" => Self::Care,
            _ => Self::Casual,
        }
    }
}

/// Normalized response length in [0, 1].
fn length_ratio(text: &str) -> f64 {
    (text.chars().count() as f64 / LENGTH_NORM).min(1.0)
}

/// How well `text` suits a personality strong in `trait_name`, in [0, 1].
/// Unknown traits are neutral.
pub fn suitability(trait_name: &str, text: &str, trigger: TriggerKind) -> f64 {
    let len = length_ratio(text);
    let s = match trait_name {
        // Short and hesitant, more so when the attention is personal.
        TRAIT_SHYNESS => match trigger {
            TriggerKind::Intimate => 1.0 - len,
            TriggerKind::Care => 1.0 - 0.8 * len,
            TriggerKind::Casual => 1.0 - 0.6 * len,
        },
        // Expressive and longer.
        TRAIT_OPENNESS => len,
        // Moderate length, warmest toward care and intimacy.
        TRAIT_AGREEABLENESS => {
            let base = 1.0 - (len - 0.35).abs();
            if trigger == TriggerKind::Casual { base * 0.8 } else { base }
        }
        // Complete sentences of reasonable size.
        TRAIT_CONSCIENTIOUSNESS => {
            let finished = text.trim_end().ends_with(['.', '!', '?']);
            let base = 1.0 - (len - 0.4).abs();
            if finished { base } else { base * 0.6 }
        }
        // Away from the extremes.
        TRAIT_EMOTIONAL_STABILITY => 1.0 - (len - 0.5).abs(),
        TRAIT_ROMANTICISM | TRAIT_FLIRTINESS => match trigger {
            TriggerKind::Intimate => 0.5 + 0.5 * len,
            _ => 0.5,
        },
        _ => 0.5,
    };
    s.clamp(0.0, 1.0)
}

/// `confidence × Σ weight × value × suitability` over the weighted traits.
///
/// In [0, 1]. A zero-confidence (inferred) personality scores 0.
pub fn personality_score(
    weights: &TraitWeights,
    personality: &PersonalityTraits,
    confidence: f64,
    trigger: &str,
    response: &DialogResponse,
) -> f64 {
    let kind = TriggerKind::classify(trigger);
    let raw: f64 = weights
        .iter()
        .filter_map(|(name, w)| {
            personality
                .get(name)
                .map(|value| w * value * suitability(name, &response.text, kind))
        })
        .sum();
    (raw * confidence.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}
