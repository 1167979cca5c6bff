//! Deterministic cache key derivation
//!
//! Keys have the shape `"<tier>:" + hex(sha256(canonical_json(fields)))`.
//! The canonical JSON is an object whose members are emitted in sorted key
//! order, so the same field set always hashes to the same key regardless of
//! the order fields were added in.

use crate::cache::types::CacheKey;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Normalize free text for use in a cache key.
///
/// Non-breaking spaces become regular spaces, whitespace runs collapse to a
/// single space and the result is trimmed. Case is preserved.
pub fn normalize_text(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex-encoded SHA-256 digest of `input`
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builder for fingerprinted cache keys
///
/// ```rust
/// use ragline_cache::cache::KeyBuilder;
///
/// let key = KeyBuilder::new("retrieval")
///     .field("v", "v1")
///     .field("topK", 6)
///     .build();
/// assert!(key.starts_with("retrieval:"));
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    tier: String,
    fields: Map<String, Value>,
}

impl KeyBuilder {
    /// Create a new key builder for a tier prefix
    pub fn new(tier: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            fields: Map::new(),
        }
    }

    /// Add a field to the fingerprint. Adding the same name twice keeps the last value.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Canonical JSON rendering of the fields
    pub fn canonical_json(&self) -> String {
        let mut names: Vec<&String> = self.fields.keys().collect();
        names.sort();

        let members: Vec<String> = names
            .into_iter()
            .map(|name| {
                format!(
                    "{}:{}",
                    Value::String(name.clone()),
                    self.fields[name.as_str()]
                )
            })
            .collect();

        format!("{{{}}}", members.join(","))
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        format!("{}:{}", self.tier, sha256_hex(&self.canonical_json()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  What   is\texample.com? \n"), "What is example.com?");
        assert_eq!(normalize_text("a\u{00A0}\u{00A0}b"), "a b");
        assert_eq!(normalize_text("Case Stays"), "Case Stays");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_hex("abc").len(), 64);
    }

    #[test]
    fn test_canonical_json_is_order_independent() {
        let a = KeyBuilder::new("t").field("b", 2).field("a", "x");
        let b = KeyBuilder::new("t").field("a", "x").field("b", 2);

        assert_eq!(a.canonical_json(), r#"{"a":"x","b":2}"#);
        assert_eq!(a.build(), b.build());
    }

    #[test]
    fn test_null_fields_are_distinct_from_missing() {
        let with_null = KeyBuilder::new("t").field("ns", Value::Null).build();
        let without = KeyBuilder::new("t").build();
        assert_ne!(with_null, without);
    }

    #[test]
    fn test_key_shape() {
        let key = KeyBuilder::new("answer").field("q", "hello").build();
        let (tier, digest) = key.split_once(':').unwrap();
        assert_eq!(tier, "answer");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
