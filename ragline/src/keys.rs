//! Cache keys for each tier
//!
//! Tier keys are `"<tier>:" + sha256(canonical JSON of the tier's fields)`.
//! Embedding keys are `"emb:<q|d>:<model>:" + sha256(normalized text)` so a
//! model's entries can be dropped by prefix.

use crate::config::RagConfig;
use ragline_cache::{normalize_text, sha256_hex, CacheKey, KeyBuilder};
use serde_json::Value;

fn namespace_field(config: &RagConfig) -> Value {
    config
        .namespace()
        .map_or(Value::Null, |ns| Value::String(ns.to_string()))
}

/// Key for a retriever bound to an index, namespace, embedder and result count
pub fn retriever_key(config: &RagConfig) -> CacheKey {
    KeyBuilder::new("retriever")
        .field("index", config.index.as_str())
        .field("namespace", namespace_field(config))
        .field("embeddingModel", config.embedding_model.as_str())
        .field("topK", config.top_k)
        .build()
}

/// Key for the retrieval result of one question
pub fn retrieval_key(config: &RagConfig, version: &str, question: &str) -> CacheKey {
    KeyBuilder::new("retrieval")
        .field("v", version)
        .field("q", normalize_text(question))
        .field("index", config.index.as_str())
        .field("namespace", namespace_field(config))
        .field("topK", config.top_k)
        .build()
}

/// Key for a grounded answer from `chat_model`.
///
/// `context_hash` is the digest of the formatted retrieval context, so the
/// answer is recomputed whenever retrieval returns different passages.
pub fn answer_key(
    config: &RagConfig,
    chat_model: &str,
    version: &str,
    question: &str,
    context_hash: &str,
) -> CacheKey {
    KeyBuilder::new("answer")
        .field("v", version)
        .field("q", normalize_text(question))
        .field("contextHash", context_hash)
        .field("index", config.index.as_str())
        .field("namespace", namespace_field(config))
        .field("topK", config.top_k)
        .field("chatModel", chat_model)
        .build()
}

/// Digest of a formatted retrieval context
pub fn context_hash(context_text: &str) -> String {
    sha256_hex(context_text)
}

/// Prefix shared by every query-embedding key of `model`
pub fn query_embedding_prefix(model: &str) -> String {
    format!("emb:q:{}:", model)
}

/// Prefix shared by every document-embedding key of `model`
pub fn document_embedding_prefix(model: &str) -> String {
    format!("emb:d:{}:", model)
}

/// Key for a query embedding; `normalized` must already be normalized
pub fn query_embedding_key(model: &str, normalized: &str) -> CacheKey {
    format!("{}{}", query_embedding_prefix(model), sha256_hex(normalized))
}

/// Key for a document embedding; `normalized` must already be normalized
pub fn document_embedding_key(model: &str, normalized: &str) -> CacheKey {
    format!("{}{}", document_embedding_prefix(model), sha256_hex(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RagConfig {
        RagConfig {
            index: "idx".into(),
            namespace: Some("dev".into()),
            chat_model: "m1".into(),
            top_k: 6,
            ..Default::default()
        }
    }

    #[test]
    fn test_answer_key_ignores_whitespace_differences() {
        let config = config();
        let a = answer_key(&config, "m1", "v1", "What is example.com?", "abc");
        let b = answer_key(&config, "m1", "v1", "What   is  example.com?", "abc");
        let c = answer_key(&config, "m1", "v1", "\u{00A0}What is example.com?\n", "abc");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.starts_with("answer:"));
    }

    #[test]
    fn test_answer_key_depends_on_every_field() {
        let base = config();
        let key = answer_key(&base, "m1", "v1", "q", "abc");

        assert_ne!(key, answer_key(&base, "m1", "v2", "q", "abc"));
        assert_ne!(key, answer_key(&base, "m1", "v1", "Q", "abc"));
        assert_ne!(key, answer_key(&base, "m1", "v1", "q", "abd"));

        let mut other = base.clone();
        other.index = "idx2".into();
        assert_ne!(key, answer_key(&other, "m1", "v1", "q", "abc"));

        let mut other = base.clone();
        other.namespace = None;
        assert_ne!(key, answer_key(&other, "m1", "v1", "q", "abc"));

        let mut other = base.clone();
        other.top_k = 7;
        assert_ne!(key, answer_key(&other, "m1", "v1", "q", "abc"));

        assert_ne!(key, answer_key(&base, "m2", "v1", "q", "abc"));
    }

    #[test]
    fn test_answer_key_ignores_configured_chat_model() {
        let base = config();
        let mut other = base.clone();
        other.chat_model = "m2".into();

        assert_eq!(
            answer_key(&base, "served", "v1", "q", "abc"),
            answer_key(&other, "served", "v1", "q", "abc")
        );
    }

    #[test]
    fn test_retrieval_key_ignores_chat_model() {
        let base = config();
        let mut other = base.clone();
        other.chat_model = "m2".into();

        assert_eq!(
            retrieval_key(&base, "v1", "q"),
            retrieval_key(&other, "v1", "q")
        );
        assert_ne!(
            retrieval_key(&base, "v1", "q"),
            retrieval_key(&base, "v2", "q")
        );
    }

    #[test]
    fn test_retriever_key_tracks_embedding_model() {
        let base = config();
        let mut other = base.clone();
        other.embedding_model = "text-embedding-3-large".into();

        assert_ne!(retriever_key(&base), retriever_key(&other));
        assert!(retriever_key(&base).starts_with("retriever:"));
    }

    #[test]
    fn test_embedding_keys() {
        let q = query_embedding_key("m", "hello");
        let d = document_embedding_key("m", "hello");

        assert!(q.starts_with("emb:q:m:"));
        assert!(d.starts_with("emb:d:m:"));
        assert_eq!(q["emb:q:m:".len()..], d["emb:d:m:".len()..]);
    }
}
