//! Personality traits: named floats in [0, 1].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_TRAITS, MAX_TRAIT_NAME_LEN},
    error::ProtocolError,
};

/// Ordered mapping of trait name → value in [0, 1].
///
/// `BTreeMap` keeps iteration order canonical, which the signing bytes and
/// the scorer both rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonalityTraits(BTreeMap<String, f64>);

/// Result of [`PersonalityTraits::sanitize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub traits: PersonalityTraits,
    /// Number of values that had to be clamped into [0, 1].
    pub clamped: usize,
}

impl PersonalityTraits {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from pairs, clamping every value into [0, 1].
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), clamp_unit(v)))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the named traits. An empty filter keeps everything.
    pub fn filtered(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        Self(
            self.0
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        )
    }

    /// Validate traits received from the network.
    ///
    /// - NaN / infinite values, empty or oversized names, and too many
    ///   traits are rejected.
    /// - Finite values outside [0, 1] are clamped and counted.
    pub fn sanitize(&self) -> Result<Sanitized, ProtocolError> {
        if self.0.len() > MAX_TRAITS {
            return Err(ProtocolError::InvalidTrait {
                name: "*".into(),
                reason: format!("{} traits exceeds limit {}", self.0.len(), MAX_TRAITS),
            });
        }
        let mut clamped = 0;
        let mut out = BTreeMap::new();
        for (name, &value) in &self.0 {
            if name.is_empty() || name.len() > MAX_TRAIT_NAME_LEN {
                return Err(ProtocolError::InvalidTrait {
                    name: name.clone(),
                    reason: "bad name length".into(),
                });
            }
            if !value.is_finite() {
                return Err(ProtocolError::InvalidTrait {
                    name: name.clone(),
                    reason: format!("non-finite value {value}"),
                });
            }
            let v = clamp_unit(value);
            if v != value {
                clamped += 1;
            }
            out.insert(name.clone(), v);
        }
        Ok(Sanitized { traits: Self(out), clamped })
    }

    /// Canonical byte form used inside the envelope signing bytes:
    /// for each trait in key order, `[name_len u16 BE][name][value f64 BE bits]`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() * 24);
        buf.extend_from_slice(&(self.0.len() as u16).to_be_bytes());
        for (name, value) in &self.0 {
            buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        buf
    }
}

impl FromIterator<(String, f64)> for PersonalityTraits {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

// NaN passes through unchanged; `sanitize` rejects it.
fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_and_counts() {
        let raw: PersonalityTraits =
            serde_json::from_str(r#"{"shyness":1.4,"openness":-0.2,"agreeableness":0.5}"#)
                .unwrap();
        let s = raw.sanitize().unwrap();
        assert_eq!(s.clamped, 2);
        assert_eq!(s.traits.get("shyness"), Some(1.0));
        assert_eq!(s.traits.get("openness"), Some(0.0));
        assert_eq!(s.traits.get("agreeableness"), Some(0.5));
    }

    #[test]
    fn sanitize_rejects_nan_and_empty_names() {
        let mut m = BTreeMap::new();
        m.insert("shyness".to_string(), f64::NAN);
        assert!(PersonalityTraits(m).sanitize().is_err());

        let mut m = BTreeMap::new();
        m.insert(String::new(), 0.5);
        assert!(PersonalityTraits(m).sanitize().is_err());
    }

    #[test]
    fn filtered_keeps_named_traits() {
        let t = PersonalityTraits::from_pairs([("shyness", 0.2), ("flirtiness", 0.9)]);
        let f = t.filtered(&["shyness".to_string()]);
        assert_eq!(f.len(), 1);
        assert_eq!(f.get("flirtiness"), None);
        assert_eq!(t.filtered(&[]), t);
    }

    #[test]
    fn canonical_bytes_ignore_insertion_order() {
        let a = PersonalityTraits::from_pairs([("a", 0.1), ("b", 0.2)]);
        let b = PersonalityTraits::from_pairs([("b", 0.2), ("a", 0.1)]);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }
}
