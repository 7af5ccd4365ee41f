//! Emotional-tone sub-score using a small keyword lexicon.
//!
//! A response is classified into valence (-1 sad .. +1 happy) and arousal
//! (0 calm .. 1 excited), then compared with the tone the context implies.

use companion_protocol::{DialogContext, DialogResponse};

use super::words;

const POSITIVE: &[&str] = &[
    "happy", "great", "good", "love", "loved", "amazing", "wonderful", "excited", "glad", "thank",
    "thanks", "sweet", "yay", "fun", "nice",
];
const NEGATIVE: &[&str] = &[
    "sad", "bad", "hate", "terrible", "awful", "angry", "worried", "lonely", "sorry", "hurt",
    "ugh", "leave",
];
const ENERGETIC: &[&str] = &[
    "excited", "energetic", "hyper", "active", "running", "dancing", "wow", "yay", "let's",
];
const CALM: &[&str] = &[
    "calm", "peaceful", "relaxed", "quiet", "sleepy", "tired", "hmm", "gently", "softly",
];

/// Weight of valence vs arousal when comparing tones.
const VALENCE_WEIGHT: f64 = 0.6;
const AROUSAL_WEIGHT: f64 = 0.4;

/// Arousal contributed by each `!`, capped.
const EXCLAIM_STEP: f64 = 0.1;
const EXCLAIM_CAP: f64 = 0.3;
/// Arousal removed by a trailing ellipsis.
const ELLIPSIS_DAMPING: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub valence: f64,
    pub arousal: f64,
}

fn count_hits(tokens: &[String], lexicon: &[&str]) -> usize {
    tokens.iter().filter(|t| lexicon.contains(&t.as_str())).count()
}

/// Balance of two counts in [-1, 1]; 0 when both are zero.
fn balance(plus: usize, minus: usize) -> f64 {
    let total = plus + minus;
    if total == 0 {
        0.0
    } else {
        (plus as f64 - minus as f64) / total as f64
    }
}

pub fn classify(text: &str) -> Tone {
    let lower = text.to_lowercase();
    let tokens = words(&lower);
    let valence = balance(count_hits(&tokens, POSITIVE), count_hits(&tokens, NEGATIVE));

    let mut arousal = 0.5 + 0.4 * balance(count_hits(&tokens, ENERGETIC), count_hits(&tokens, CALM));
    let exclaims = lower.matches('!').count() as f64;
    arousal += (exclaims * EXCLAIM_STEP).min(EXCLAIM_CAP);
    if lower.trim_end().ends_with("...") {
        arousal -= ELLIPSIS_DAMPING;
    }

    Tone { valence: valence.clamp(-1.0, 1.0), arousal: arousal.clamp(0.0, 1.0) }
}

/// Relationship warmth in [0, 1] by level name.
fn relationship_warmth(level: &str) -> f64 {
    match level.to_ascii_lowercase().as_str() {
        "stranger" => 0.0,
        "acquaintance" => 0.25,
        "friend" => 0.5,
        "close_friend" | "close friend" => 0.75,
        "romantic" | "partner" | "romantic_interest" => 1.0,
        _ => 0.25,
    }
}

/// Tone implied by mood (0–100) and relationship level.
pub fn expected_tone(context: &DialogContext) -> Tone {
    let mood = (context.mood / 100.0).clamp(0.0, 1.0);
    let warmth = relationship_warmth(&context.relationship_level);
    // Mood sets the sign; a warm relationship pulls toward positive.
    let valence = (2.0 * mood - 1.0) * 0.8 + warmth * 0.2;
    let arousal = 0.3 + 0.4 * mood + 0.2 * warmth;
    Tone { valence: valence.clamp(-1.0, 1.0), arousal: arousal.clamp(0.0, 1.0) }
}

/// Closeness of the response's tone to the expected one, in [0, 1].
pub fn tone_score(context: &DialogContext, response: &DialogResponse) -> f64 {
    let got = classify(&response.text);
    let want = expected_tone(context);
    let distance = VALENCE_WEIGHT * (got.valence - want.valence).abs() / 2.0
        + AROUSAL_WEIGHT * (got.arousal - want.arousal).abs();
    (1.0 - distance).clamp(0.0, 1.0)
}
