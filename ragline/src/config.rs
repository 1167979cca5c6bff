//! Request and cache configuration
//!
//! Library code never loads `.env` files; the binary does that before
//! calling the `from_env` constructors here.

use crate::error::{RagError, Result};
use ragline_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TOP_K: usize = 6;
pub const MAX_TOP_K: usize = 50;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration relevant to a chat or ingest request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub openai_api_key: String,
    pub pinecone_api_key: String,
    /// Vector index name
    pub index: String,
    /// Vector index namespace; `None` means the store's default namespace
    pub namespace: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    /// Number of passages retrieved per question (1..=50)
    pub top_k: usize,
    pub openai_base_url: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            pinecone_api_key: String::new(),
            index: String::new(),
            namespace: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            top_k: DEFAULT_TOP_K,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

impl RagConfig {
    /// Read configuration from the process environment.
    ///
    /// Missing credentials are left empty for [`validate`](Self::validate) to
    /// report; only unparseable values fail here.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            pinecone_api_key: env::var("PINECONE_API_KEY").unwrap_or_default(),
            index: env::var("PINECONE_INDEX").unwrap_or_default(),
            namespace: non_empty_var("PINECONE_NAMESPACE"),
            embedding_model: non_empty_var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            chat_model: non_empty_var("OPENAI_CHAT_MODEL").unwrap_or(defaults.chat_model),
            top_k: parse_var("RAG_TOP_K")?.unwrap_or(defaults.top_k),
            openai_base_url: non_empty_var("OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url),
        })
    }

    /// Report the first missing or out-of-range field
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("OPENAI_API_KEY", &self.openai_api_key),
            ("PINECONE_API_KEY", &self.pinecone_api_key),
            ("PINECONE_INDEX", &self.index),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RagError::MissingParam(format!("{} is not set", name)));
            }
        }

        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(RagError::InvalidParam(format!(
                "topK must be between 1 and {}, got {}",
                MAX_TOP_K, self.top_k
            )));
        }

        Ok(())
    }

    /// Namespace as used in cache keys and reports
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// Capacity, TTL and version of one cache tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    pub max_entries: usize,
    /// `None` means entries never expire
    pub ttl: Option<Duration>,
}

impl TierSettings {
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self { max_entries, ttl }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let builder = CacheConfig::builder().max_entries(self.max_entries);
        match self.ttl {
            Some(ttl) => builder.default_ttl(ttl).build(),
            None => builder.no_ttl().build(),
        }
    }
}

/// Settings for the four cache tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub retriever: TierSettings,
    pub retrieval: TierSettings,
    pub embeddings: TierSettings,
    pub answer: TierSettings,
    /// Bump to invalidate every retrieval entry after a format change
    pub retrieval_version: String,
    /// Bump to invalidate every answer after a prompt or parsing change
    pub answer_version: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            retriever: TierSettings::new(50, Some(DAY)),
            retrieval: TierSettings::new(2_000, Some(DAY)),
            embeddings: TierSettings::new(5_000, Some(DAY)),
            answer: TierSettings::new(500, Some(DAY * 7)),
            retrieval_version: "v1".to_string(),
            answer_version: "v1".to_string(),
        }
    }
}

impl CacheSettings {
    /// Apply `RAG_CACHE_*` overrides from the process environment
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(ttl) = ttl_var("RAG_CACHE_RETRIEVER_TTL_MS")? {
            settings.retriever.ttl = ttl;
        }
        if let Some(ttl) = ttl_var("RAG_CACHE_RETRIEVAL_TTL_MS")? {
            settings.retrieval.ttl = ttl;
        }
        if let Some(ttl) = ttl_var("RAG_CACHE_EMBEDDINGS_TTL_MS")? {
            settings.embeddings.ttl = ttl;
        }
        if let Some(ttl) = ttl_var("RAG_CACHE_ANSWER_TTL_MS")? {
            settings.answer.ttl = ttl;
        }
        if let Some(max) = parse_var("RAG_CACHE_EMBEDDINGS_MAX_ENTRIES")? {
            settings.embeddings.max_entries = max;
        }
        if let Some(max) = parse_var("RAG_CACHE_ANSWER_MAX_ENTRIES")? {
            settings.answer.max_entries = max;
        }
        if let Some(version) = non_empty_var("RAG_CACHE_RETRIEVAL_VERSION") {
            settings.retrieval_version = version;
        }
        if let Some(version) = non_empty_var("RAG_CACHE_ANSWER_VERSION") {
            settings.answer_version = version;
        }

        Ok(settings)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| RagError::Config(format!("{} must be a number, got '{}'", name, raw))),
    }
}

/// Millisecond TTL override; `0` disables expiration
fn ttl_var(name: &str) -> Result<Option<Option<Duration>>> {
    Ok(parse_var::<u64>(name)?
        .map(|ms| Some(Duration::from_millis(ms)).filter(|ttl| !ttl.is_zero())))
}
