//! Ordered key → weight map used for request payloads and reconciled output.
//!
//! Iteration order is insertion order. Candidate truncation, the fuzzy-match scan and tie-breaking
//! when ranking by weight all depend on it, so this type never reorders entries on its own.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered mapping of candidate key to numeric weight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyWeights {
    entries: IndexMap<String, i64>,
}

impl KeyWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Insert or update a key. Updating keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, weight: i64) -> Option<i64> {
        self.entries.insert(key.into(), weight)
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, w)| (k.as_str(), *w))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The first `limit` keys in insertion order.
    pub fn candidate_keys(&self, limit: usize) -> Vec<&str> {
        self.keys().take(limit).collect()
    }

    /// Entries stable-sorted by weight descending, truncated to `limit`. Ties keep insertion order.
    pub fn top_n(&self, limit: usize) -> KeyWeights {
        let mut ranked: Vec<(&String, &i64)> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1));
        ranked
            .into_iter()
            .take(limit)
            .map(|(k, w)| (k.clone(), *w))
            .collect()
    }
}

impl FromIterator<(String, i64)> for KeyWeights {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, i64)> for KeyWeights {
    fn from_iter<I: IntoIterator<Item = (&'a str, i64)>>(iter: I) -> Self {
        iter.into_iter().map(|(k, w)| (k.to_string(), w)).collect()
    }
}

impl<const N: usize> From<[(&str, i64); N]> for KeyWeights {
    fn from(pairs: [(&str, i64); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for KeyWeights {
    type Item = (String, i64);
    type IntoIter = indexmap::map::IntoIter<String, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let kw = KeyWeights::from([("zeta", 1), ("alpha", 9), ("mid", 4)]);
        let keys: Vec<&str> = kw.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn update_keeps_position() {
        let mut kw = KeyWeights::from([("a", 1), ("b", 2)]);
        assert_eq!(kw.insert("a", 10), Some(1));
        let keys: Vec<&str> = kw.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(kw.get("a"), Some(10));
    }

    #[test]
    fn top_n_sorts_descending_with_stable_ties() {
        let kw = KeyWeights::from([("first", 3), ("big", 8), ("second", 3), ("small", 1)]);
        let top = kw.top_n(3);
        let ranked: Vec<(&str, i64)> = top.iter().collect();
        assert_eq!(ranked, vec![("big", 8), ("first", 3), ("second", 3)]);
    }

    #[test]
    fn candidate_keys_bounded() {
        let kw: KeyWeights = (0..100).map(|i| (format!("k{i}"), i)).collect();
        let candidates = kw.candidate_keys(50);
        assert_eq!(candidates.len(), 50);
        assert_eq!(candidates[0], "k0");
        assert_eq!(candidates[49], "k49");
    }

    #[test]
    fn serializes_as_plain_object() {
        let kw = KeyWeights::from([("b", 2), ("a", 1)]);
        let json = serde_json::to_string(&kw).unwrap();
        assert_eq!(json, r#"{"b":2,"a":1}"#);
        let back: KeyWeights = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kw);
    }
}
