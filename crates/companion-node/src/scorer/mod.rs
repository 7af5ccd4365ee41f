//! Multi-factor response scoring.
//!
//! `total = personality + flow + tone`, each sub-score in [0, 1] and
//! computable on its own. Scores depend only on the candidate and the
//! context, never on the order candidates are seen in.

pub mod flow;
pub mod personality;
pub mod tone;
pub mod weights;

pub use weights::TraitWeights;

use companion_protocol::{DialogContext, DialogResponse, PersonalityTraits, ResponseSource};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub personality: f64,
    pub flow: f64,
    pub tone: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseScorer {
    weights: TraitWeights,
}

impl ResponseScorer {
    pub fn new(weights: TraitWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &TraitWeights {
        &self.weights
    }

    /// Score `response` for `context` against a personality held with
    /// `confidence` (1.0 for our own, 0.0 for a guess).
    pub fn score(
        &self,
        context: &DialogContext,
        response: &DialogResponse,
        personality: &PersonalityTraits,
        confidence: f64,
    ) -> ScoreBreakdown {
        let personality =
            personality::personality_score(&self.weights, personality, confidence, &context.trigger, response);
        let flow = flow::flow_score(context, response);
        let tone = tone::tone_score(context, response);
        ScoreBreakdown { personality, flow, tone, total: personality + flow + tone }
    }
}

/// A response with its score, ready for selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub response: DialogResponse,
    pub breakdown: ScoreBreakdown,
}

impl ScoredCandidate {
    pub fn total(&self) -> f64 {
        self.breakdown.total
    }
}

/// Pick the winner among `candidates`.
///
/// - Empty-text candidates lose to any non-empty one.
/// - The best peer is the highest score, ties broken by peer id.
/// - A peer beats the local candidate only by more than `epsilon`.
///
/// The result does not depend on the order of `candidates`.
pub fn select_winner(candidates: &[ScoredCandidate], epsilon: f64) -> Option<&ScoredCandidate> {
    let usable = |c: &&ScoredCandidate| !c.response.is_empty() && c.total().is_finite();

    let local = candidates
        .iter()
        .filter(usable)
        .filter(|c| c.response.source.is_local())
        .max_by(|a, b| a.total().total_cmp(&b.total()));

    let best_peer = candidates
        .iter()
        .filter(usable)
        .filter(|c| !c.response.source.is_local())
        .max_by(|a, b| {
            a.total()
                .total_cmp(&b.total())
                // Lower peer id wins an exact tie.
                .then_with(|| peer_key(&b.response.source).cmp(peer_key(&a.response.source)))
        });

    match (local, best_peer) {
        (Some(l), Some(p)) if p.total() > l.total() + epsilon => Some(p),
        (Some(l), _) => Some(l),
        (None, Some(p)) => Some(p),
        // Nothing usable: fall back to whatever local candidate exists.
        (None, None) => candidates.iter().find(|c| c.response.source.is_local()).or(candidates.first()),
    }
}

/// Lowercased words of `text`, split on anything but letters, digits and
/// apostrophes.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn peer_key(source: &ResponseSource) -> &str {
    source.peer_id().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_protocol::InteractionRecord;

    fn cand(source: Option<&str>, text: &str, total: f64) -> ScoredCandidate {
        let mut response = DialogResponse::local(text, "talking", 0);
        if let Some(peer) = source {
            response = response.from_peer(peer);
        }
        ScoredCandidate { response, breakdown: ScoreBreakdown { total, ..Default::default() } }
    }

    #[test]
    fn local_wins_within_epsilon() {
        let cs = [cand(Some("yuki"), "a", 0.9), cand(None, "b", 0.9000001), cand(Some("rin"), "c", 0.5)];
        assert!(select_winner(&cs, 1e-6).unwrap().response.source.is_local());

        let cs = [cand(Some("yuki"), "a", 0.9000005), cand(None, "b", 0.9)];
        assert!(select_winner(&cs, 1e-6).unwrap().response.source.is_local());

        let cs = [cand(Some("yuki"), "a", 0.95), cand(None, "b", 0.9)];
        assert_eq!(select_winner(&cs, 1e-6).unwrap().response.source.peer_id(), Some("yuki"));
    }

    #[test]
    fn winner_is_order_independent() {
        let a = cand(Some("yuki"), "a", 1.2);
        let b = cand(Some("rin"), "b", 1.2);
        let c = cand(None, "c", 0.4);
        let w1 = select_winner(&[a.clone(), b.clone(), c.clone()], 1e-6).unwrap().clone();
        let w2 = select_winner(&[c, a, b], 1e-6).unwrap().clone();
        assert_eq!(w1, w2);
        assert_eq!(w1.response.source.peer_id(), Some("rin"));
    }

    #[test]
    fn empty_text_never_wins_over_text() {
        let cs = [cand(None, "   ", 2.5), cand(Some("yuki"), "Hello!", 0.1)];
        assert_eq!(select_winner(&cs, 1e-6).unwrap().response.text, "Hello!");
        let cs = [cand(None, "", 0.1)];
        assert!(select_winner(&cs, 1e-6).unwrap().response.source.is_local());
        assert!(select_winner(&[], 1e-6).is_none());
    }

    #[test]
    fn scores_are_independent_of_candidate_order() {
        let scorer = ResponseScorer::default();
        let mut ctx = DialogContext::new("compliment", 70.0, 0);
        ctx.push_history(InteractionRecord {
            trigger: "click".into(),
            response: "Oh, hi!".into(),
            animation: "talking".into(),
            source: ResponseSource::Local,
            timestamp: 0,
        });
        let me = PersonalityTraits::from_pairs([("shyness", 0.8), ("openness", 0.3)]);
        let a = DialogResponse::local("Th-thank you...", "blush", 0);
        let b = DialogResponse::local("You're too kind! That made my day!", "happy", 0).from_peer("yuki");
        let c = DialogResponse::local("Hmm.", "idle", 0).from_peer("rin");

        let forward: Vec<f64> = [&a, &b, &c].iter().map(|r| scorer.score(&ctx, r, &me, 1.0).total).collect();
        let rotated: Vec<f64> = [&c, &a, &b].iter().map(|r| scorer.score(&ctx, r, &me, 1.0).total).collect();
        assert_eq!(forward, vec![rotated[1], rotated[2], rotated[0]]);
    }

    #[test]
    fn breakdown_adds_up() {
        let scorer = ResponseScorer::default();
        let ctx = DialogContext::new("feed", 60.0, 0);
        let me = PersonalityTraits::from_pairs([("shyness", 0.5)]);
        let s = scorer.score(&ctx, &DialogResponse::local("Yum!", "happy", 0), &me, 1.0);
        assert!((s.total - (s.personality + s.flow + s.tone)).abs() < 1e-12);
    }
}
