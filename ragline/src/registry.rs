//! The four cache tiers of the chat pipeline
//!
//! A [`CacheRegistry`] is built once at startup and shared by handle with
//! every component that needs cache access. Tiers are independent: a purge
//! of one never touches another.

use crate::answer::CachedAnswer;
use crate::config::CacheSettings;
use crate::error::{RagError, Result};
use crate::retrieval::{RetrievalResult, Retriever};
use ragline_cache::{CacheStats, MemoryCache};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Which tiers a purge applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    All,
    Retriever,
    Retrieval,
    Embeddings,
    Answer,
}

impl CacheScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Retriever => "retriever",
            Self::Retrieval => "retrieval",
            Self::Embeddings => "embeddings",
            Self::Answer => "answer",
        }
    }

    fn includes(&self, tier: CacheScope) -> bool {
        *self == CacheScope::All || *self == tier
    }
}

impl FromStr for CacheScope {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(Self::All),
            "retriever" => Ok(Self::Retriever),
            "retrieval" => Ok(Self::Retrieval),
            "embeddings" => Ok(Self::Embeddings),
            "answer" => Ok(Self::Answer),
            other => Err(RagError::InvalidScope(other.to_string())),
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and current size of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub size: usize,
}

/// Snapshot of every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub retriever: TierStats,
    pub retrieval: TierStats,
    pub embeddings: TierStats,
    pub answer: TierStats,
}

/// Process-wide cache tiers
#[derive(Clone)]
pub struct CacheRegistry {
    pub retriever: MemoryCache<Arc<Retriever>, RagError>,
    pub retrieval: MemoryCache<Arc<RetrievalResult>, RagError>,
    pub embeddings: MemoryCache<Vec<f32>, RagError>,
    pub answer: MemoryCache<CachedAnswer, RagError>,
    settings: Arc<CacheSettings>,
}

impl CacheRegistry {
    /// Build all four tiers; an invalid capacity fails the whole registry
    pub fn new(settings: CacheSettings) -> Result<Self> {
        let registry = Self {
            retriever: MemoryCache::new("retriever", settings.retriever.cache_config())?,
            retrieval: MemoryCache::new("retrieval", settings.retrieval.cache_config())?,
            embeddings: MemoryCache::new("embeddings", settings.embeddings.cache_config())?,
            answer: MemoryCache::new("answer", settings.answer.cache_config())?,
            settings: Arc::new(settings),
        };

        info!(
            retrieval_version = %registry.settings.retrieval_version,
            answer_version = %registry.settings.answer_version,
            "Cache registry initialized"
        );
        Ok(registry)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn retrieval_version(&self) -> &str {
        &self.settings.retrieval_version
    }

    pub fn answer_version(&self) -> &str {
        &self.settings.answer_version
    }

    /// Clear the tiers named by `scope`
    pub async fn purge(&self, scope: CacheScope) {
        if scope.includes(CacheScope::Retriever) {
            self.retriever.clear().await;
        }
        if scope.includes(CacheScope::Retrieval) {
            self.retrieval.clear().await;
        }
        if scope.includes(CacheScope::Embeddings) {
            self.embeddings.clear().await;
        }
        if scope.includes(CacheScope::Answer) {
            self.answer.clear().await;
        }

        info!(scope = %scope, "Purged cache tiers");
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            retriever: tier_stats(&self.retriever).await,
            retrieval: tier_stats(&self.retrieval).await,
            embeddings: tier_stats(&self.embeddings).await,
            answer: tier_stats(&self.answer).await,
        }
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

async fn tier_stats<V>(cache: &MemoryCache<V, RagError>) -> TierStats
where
    V: Clone + Send + Sync + 'static,
{
    TierStats {
        stats: cache.stats().await,
        size: cache.len().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierSettings;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("answer".parse::<CacheScope>().unwrap(), CacheScope::Answer);
        assert_eq!(" all ".parse::<CacheScope>().unwrap(), CacheScope::All);
        assert!(matches!(
            "pinecone".parse::<CacheScope>(),
            Err(RagError::InvalidScope(s)) if s == "pinecone"
        ));
    }

    #[test]
    fn test_zero_capacity_fails_construction() {
        let settings = CacheSettings {
            answer: TierSettings::new(0, None),
            ..Default::default()
        };
        assert!(matches!(
            CacheRegistry::new(settings),
            Err(RagError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_answer_only() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        registry.embeddings.set("emb:q:m:1", vec![1.0], None).await;
        registry
            .answer
            .set("answer:1", CachedAnswer::fallback(), None)
            .await;
        registry.embeddings.get("emb:q:m:1").await;

        let before = registry.stats().await;
        registry.purge(CacheScope::Answer).await;
        let after = registry.stats().await;

        assert_eq!(after.answer.size, 0);
        assert_eq!(after.embeddings, before.embeddings);
        assert_eq!(after.retrieval, before.retrieval);
        assert_eq!(after.retriever, before.retriever);
    }

    #[tokio::test]
    async fn test_stats_serialize_flat() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        registry.answer.get("missing").await;

        let json = serde_json::to_value(registry.stats().await).unwrap();
        assert_eq!(json["answer"]["misses"], 1);
        assert_eq!(json["answer"]["coldMisses"], 1);
        assert_eq!(json["answer"]["size"], 0);
        assert_eq!(json["retriever"]["hits"], 0);
    }
}
