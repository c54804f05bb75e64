//! Ordered OSM tag lists.
//!
//! Tags keep their source order because downstream consumers (way
//! simplification, tag-JSON payloads) reproduce them verbatim.

use serde::{Deserialize, Serialize};

/// An ordered sequence of `(key, value)` tags with by-key lookup.
///
/// # Examples
/// ```rust
/// use roam_core::TagList;
///
/// let tags = TagList::from_pairs([("highway", "residential"), ("name", "Lange Gracht")]);
/// assert_eq!(tags.get("highway"), Some("residential"));
/// assert!(tags.has_key_prefix("name"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagList(Vec<(String, String)>);

impl TagList {
    /// Create an empty tag list.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a tag list from string-like pairs, preserving order.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value of the first tag with the given key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Report whether any tag carries the given key.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Report whether any key starts with the given prefix.
    #[must_use]
    pub fn has_key_prefix(&self, prefix: &str) -> bool {
        self.0.iter().any(|(k, _)| k.starts_with(prefix))
    }

    /// Append a tag, keeping existing entries untouched.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Iterate over `(key, value)` pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Report whether the list holds no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialise the tags as a JSON object string.
    ///
    /// Later duplicates of a key win, matching JSON object semantics.
    #[must_use]
    pub fn to_json(&self) -> String {
        let mut map = serde_json::Map::with_capacity(self.0.len());
        for (k, v) in &self.0 {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        serde_json::Value::Object(map).to_string()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn lookup_finds_first_match() {
        let tags = TagList::from_pairs([("a", "1"), ("a", "2"), ("b", "3")]);
        assert_eq!(tags.get("a"), Some("1"));
        assert_eq!(tags.get("b"), Some("3"));
        assert_eq!(tags.get("c"), None);
    }

    #[rstest]
    fn prefix_matches_address_keys() {
        let tags = TagList::from_pairs([("addr:street", "Hoofdstraat"), ("building", "yes")]);
        assert!(tags.has_key_prefix("addr:"));
        assert!(!tags.has_key_prefix("amenity"));
    }

    #[rstest]
    fn json_round_trips_through_serde() {
        let tags = TagList::from_pairs([("amenity", "bar"), ("name", "De \"Kroeg\"")]);
        let json = tags.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(value["amenity"], "bar");
        assert_eq!(value["name"], "De \"Kroeg\"");
    }

    #[rstest]
    fn empty_list_serialises_to_empty_object() {
        assert_eq!(TagList::new().to_json(), "{}");
    }
}
