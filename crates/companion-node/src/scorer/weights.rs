use companion_protocol::constants::{
    TRAIT_AGREEABLENESS, TRAIT_CONSCIENTIOUSNESS, TRAIT_EMOTIONAL_STABILITY, TRAIT_OPENNESS,
    TRAIT_SHYNESS,
};
use std::collections::BTreeMap;

use crate::error::NodeError;

/// Allowed drift of the weight sum from 1.0.
const SUM_TOLERANCE: f64 = 1e-9;

/// Trait → weight table for the personality sub-score.
///
/// Plain data so weights can be swapped (e.g. learned) without code changes.
/// Weights are non-negative and sum to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitWeights(BTreeMap<String, f64>);

impl Default for TraitWeights {
    fn default() -> Self {
        Self(
            [
                (TRAIT_SHYNESS, 0.30),
                (TRAIT_OPENNESS, 0.25),
                (TRAIT_AGREEABLENESS, 0.20),
                (TRAIT_CONSCIENTIOUSNESS, 0.15),
                (TRAIT_EMOTIONAL_STABILITY, 0.10),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        )
    }
}

impl TraitWeights {
    pub fn new<I, S>(pairs: I) -> Result<Self, NodeError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let map: BTreeMap<String, f64> = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if map.is_empty() {
            return Err(NodeError::InvalidConfig("trait weight table is empty".into()));
        }
        if let Some((name, w)) = map.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(NodeError::InvalidConfig(format!("bad weight {w} for trait {name}")));
        }
        let sum: f64 = map.values().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(NodeError::InvalidConfig(format!("trait weights sum to {sum}, expected 1.0")));
        }
        Ok(Self(map))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
