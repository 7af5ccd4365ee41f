//! Conversation-flow sub-score: diversity against recent history plus
//! turn alternation between sources.

use companion_protocol::{DialogContext, DialogResponse};

use super::words;

/// History entries compared against.
const RECENT_WINDOW: usize = 3;

const PENALTY_IDENTICAL: f64 = 0.5;
const PENALTY_SIMILAR_LENGTH: f64 = 0.2;
const PENALTY_WORD_OVERLAP: f64 = 0.3;

/// Length difference (chars) below which two lines count as similar.
const SIMILAR_LENGTH_CHARS: usize = 10;
/// Share of all words that must be shared for lines to overlap.
const OVERLAP_RATIO: f64 = 0.3;
/// Shorter words never count as shared.
const MIN_WORD_LEN: usize = 4;

const DIVERSITY_WEIGHT: f64 = 0.8;
const ALTERNATION_WEIGHT: f64 = 0.2;

/// Score for a conversation with no history.
pub const NEUTRAL_FLOW: f64 = 0.5;

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// True if more than [`OVERLAP_RATIO`] of `a`'s words are meaningful words
/// that also occur in `b`. Short words count toward the total only.
pub fn has_significant_overlap(a: &str, b: &str) -> bool {
    let wa = words(a);
    let wb = words(b);
    if wa.is_empty() || wb.is_empty() {
        return false;
    }
    let shared = wa
        .iter()
        .filter(|w| w.chars().count() >= MIN_WORD_LEN && wb.contains(w))
        .count();
    shared as f64 / wa.len() as f64 > OVERLAP_RATIO
}

/// 1.0 minus repetition penalties against the last few responses.
pub fn diversity(context: &DialogContext, response: &DialogResponse) -> f64 {
    let text = normalize(&response.text);
    let len = text.chars().count();
    let mut penalty = 0.0;
    for record in context.recent(RECENT_WINDOW) {
        let recent = normalize(&record.response);
        if recent == text {
            penalty += PENALTY_IDENTICAL;
        }
        if len.abs_diff(recent.chars().count()) < SIMILAR_LENGTH_CHARS {
            penalty += PENALTY_SIMILAR_LENGTH;
        }
        if has_significant_overlap(&text, &recent) {
            penalty += PENALTY_WORD_OVERLAP;
        }
    }
    (1.0 - penalty).clamp(0.0, 1.0)
}

/// 1.0 when the candidate would change who is speaking, 0.0 when the same
/// source would speak twice in a row.
pub fn alternation(context: &DialogContext, response: &DialogResponse) -> f64 {
    match context.history.last() {
        Some(last) if last.source == response.source => 0.0,
        _ => 1.0,
    }
}

pub fn flow_score(context: &DialogContext, response: &DialogResponse) -> f64 {
    if context.history.is_empty() {
        return NEUTRAL_FLOW;
    }
    DIVERSITY_WEIGHT * diversity(context, response) + ALTERNATION_WEIGHT * alternation(context, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_protocol::{InteractionRecord, ResponseSource};

    fn ctx_with(lines: &[(&str, ResponseSource)]) -> DialogContext {
        let mut ctx = DialogContext::new("click", 50.0, 0);
        for (i, (text, source)) in lines.iter().enumerate() {
            ctx.push_history(InteractionRecord {
                trigger: "click".into(),
                response: text.to_string(),
                animation: String::new(),
                source: source.clone(),
                timestamp: i as u64,
            });
        }
        ctx
    }

    #[test]
    fn empty_history_is_neutral() {
        let ctx = DialogContext::new("click", 50.0, 0);
        assert_eq!(flow_score(&ctx, &DialogResponse::local("Hi", "talking", 0)), NEUTRAL_FLOW);
    }

    #[test]
    fn repeating_the_last_line_is_penalized() {
        let ctx = ctx_with(&[("Hello there, friend!", ResponseSource::Local)]);
        let same = DialogResponse::local("hello there, friend!", "talking", 0);
        let fresh = DialogResponse::local("Did you bring snacks today? I was waiting all morning.", "talking", 0);
        assert!(flow_score(&ctx, &fresh) > flow_score(&ctx, &same));
        assert_eq!(diversity(&ctx, &same), 0.0);
        assert_eq!(diversity(&ctx, &fresh), 1.0);
    }

    #[test]
    fn alternating_sources_are_rewarded() {
        let ctx = ctx_with(&[("Something long enough to differ", ResponseSource::Local)]);
        let local = DialogResponse::local("Totally different words here!!", "talking", 0);
        let peer = local.clone().from_peer("yuki");
        assert!(flow_score(&ctx, &peer) > flow_score(&ctx, &local));
    }

    #[test]
    fn overlap_ignores_short_words() {
        assert!(!has_significant_overlap("I am ok", "I am ok"));
        assert!(has_significant_overlap("snacks are lovely", "lovely snacks"));
    }

    #[test]
    fn overlap_ratio_counts_every_word() {
        // One shared word out of five is under the threshold.
        assert!(!has_significant_overlap("I am so very happy", "happy"));
        assert!(has_significant_overlap("so happy", "happy"));
    }
}
