//! Dialog value types shared by both ends of a DialogQuery / DialogReply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_SOURCE;

/// Maximum interaction records kept in a context's history.
pub const MAX_HISTORY: usize = 10;

/// One past exchange in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub trigger: String,
    pub response: String,
    #[serde(default)]
    pub animation: String,
    /// Who produced `response`.
    pub source: ResponseSource,
    pub timestamp: u64,
}

/// The conversational situation a response is chosen for.
///
/// Read-only input to scoring. History is ordered oldest → newest and
/// bounded to [`MAX_HISTORY`] entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogContext {
    /// What prompted the dialog, e.g. "click", "feed", "compliment".
    pub trigger: String,
    pub history: Vec<InteractionRecord>,
    /// Relationship metrics on a 0–100 scale (affection, trust, ...).
    pub current_stats: BTreeMap<String, f64>,
    /// Current mood on a 0–100 scale.
    pub mood: f64,
    pub relationship_level: String,
    /// Unix microseconds.
    pub timestamp: u64,
}

impl DialogContext {
    pub fn new(trigger: impl Into<String>, mood: f64, timestamp: u64) -> Self {
        Self {
            trigger: trigger.into(),
            mood,
            timestamp,
            ..Default::default()
        }
    }

    /// Append a record, dropping the oldest once the history is full.
    pub fn push_history(&mut self, record: InteractionRecord) {
        self.history.push(record);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[InteractionRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

/// Where a candidate response came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ResponseSource {
    Local,
    Peer(String),
}

impl ResponseSource {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    pub fn peer_id(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Peer(id) => Some(id),
        }
    }
}

impl From<ResponseSource> for String {
    fn from(s: ResponseSource) -> Self {
        match s {
            ResponseSource::Local => LOCAL_SOURCE.to_string(),
            ResponseSource::Peer(id) => id,
        }
    }
}

impl From<String> for ResponseSource {
    fn from(s: String) -> Self {
        if s == LOCAL_SOURCE {
            Self::Local
        } else {
            Self::Peer(s)
        }
    }
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str(LOCAL_SOURCE),
            Self::Peer(id) => f.write_str(id),
        }
    }
}

/// A candidate reply. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogResponse {
    pub text: String,
    /// Animation hint for the renderer, e.g. "talking", "blush".
    pub animation: String,
    pub source: ResponseSource,
    /// Generator's own confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Unix microseconds.
    pub generated_at: u64,
}

impl DialogResponse {
    pub fn local(text: impl Into<String>, animation: impl Into<String>, generated_at: u64) -> Self {
        Self {
            text: text.into(),
            animation: animation.into(),
            source: ResponseSource::Local,
            confidence: 1.0,
            generated_at,
        }
    }

    /// Same response re-tagged as coming from `peer_id`.
    pub fn from_peer(mut self, peer_id: &str) -> Self {
        self.source = ResponseSource::Peer(peer_id.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: u64) -> InteractionRecord {
        InteractionRecord {
            trigger: "click".into(),
            response: format!("line {i}"),
            animation: "talking".into(),
            source: ResponseSource::Local,
            timestamp: i,
        }
    }

    #[test]
    fn history_is_bounded_and_keeps_newest() {
        let mut ctx = DialogContext::new("click", 50.0, 0);
        for i in 0..15 {
            ctx.push_history(record(i));
        }
        assert_eq!(ctx.history.len(), MAX_HISTORY);
        assert_eq!(ctx.history.first().unwrap().timestamp, 5);
        assert_eq!(ctx.history.last().unwrap().timestamp, 14);
        assert_eq!(ctx.recent(3).len(), 3);
        assert_eq!(ctx.recent(3)[2].timestamp, 14);
    }

    #[test]
    fn source_serializes_as_plain_string() {
        let local = serde_json::to_string(&ResponseSource::Local).unwrap();
        assert_eq!(local, "\"local\"");
        let peer: ResponseSource = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(peer, ResponseSource::Peer("alice".into()));
    }
}
