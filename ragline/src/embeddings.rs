//! Embedding provider backed by the embeddings cache tier

use crate::error::{RagError, Result};
use crate::keys::{document_embedding_key, query_embedding_key};
use crate::providers::EmbeddingProvider;
use async_trait::async_trait;
use futures::future::try_join_all;
use ragline_cache::{normalize_text, MemoryCache};
use std::sync::Arc;
use tracing::debug;

/// Embedding provider that consults the cache before the wrapped provider.
///
/// Texts are normalized before hashing and before being sent upstream, so
/// trivially different inputs share one vector. Concurrent misses on the
/// same text share one upstream call.
#[derive(Clone)]
pub struct CachedEmbeddings {
    inner: Arc<dyn EmbeddingProvider>,
    cache: MemoryCache<Vec<f32>, RagError>,
}

impl CachedEmbeddings {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: MemoryCache<Vec<f32>, RagError>) -> Self {
        Self { inner, cache }
    }

    /// The provider calls are delegated to
    pub fn inner(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = normalize_text(text);
        let key = document_embedding_key(self.inner.model(), &normalized);
        let inner = Arc::clone(&self.inner);

        self.cache
            .get_or_set(
                key,
                move || async move {
                    let mut vectors = inner.embed_documents(&[normalized]).await?;
                    vectors
                        .pop()
                        .ok_or_else(|| RagError::upstream("embeddings", "empty embedding response"))
                },
                None,
            )
            .await
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddings {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = normalize_text(text);
        let key = query_embedding_key(self.inner.model(), &normalized);
        let inner = Arc::clone(&self.inner);

        self.cache
            .get_or_set(
                key,
                move || async move { inner.embed_query(&normalized).await },
                None,
            )
            .await
    }

    /// Each text is looked up independently; misses are not batched.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(count = texts.len(), "Embedding documents through cache");
        try_join_all(texts.iter().map(|text| self.embed_document(text))).await
    }
}
