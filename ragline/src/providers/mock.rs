//! Deterministic in-memory providers for tests and offline runs.
//!
//! - [`MockEmbedder`]: bag-of-words vectors hashed into a fixed dimension
//! - [`MockVectorIndex`]: per-namespace store ranked by cosine similarity
//! - [`MockIndexConnector`]: hands out one shared [`MockVectorIndex`]
//! - [`MockCompletion`]: scripted completion text, streamed word by word
//!
//! Every mock counts its own invocations so tests can assert how many
//! upstream calls the caches let through.

use crate::error::{RagError, Result};
use crate::providers::{
    CompletionProvider, EmbeddingProvider, IndexConnector, ScoredDocument, VectorIndex,
    VectorRecord, DEFAULT_NAMESPACE,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use ragline_cache::sha256_hex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MOCK_DIMENSION: usize = 64;

/// Mock embedding provider
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    model: String,
    query_calls: Arc<AtomicUsize>,
    document_calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl MockEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            query_calls: Arc::new(AtomicUsize::new(0)),
            document_calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
            latency: None,
        }
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make subsequent calls fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Number of `embed_documents` calls (not texts)
    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.query_calls() + self.document_calls()
    }

    /// The vector this embedder produces for `text`
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; MOCK_DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = sha256_hex(word);
            let bucket = usize::from_str_radix(&digest[..8], 16).unwrap_or(0) % MOCK_DIMENSION;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    async fn simulate(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::upstream("mock-embeddings", "simulated outage"));
        }
        Ok(())
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new("mock-embedding")
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(Self::vector_for(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(texts.iter().map(|text| Self::vector_for(text)).collect())
    }
}

/// Mock vector index
#[derive(Debug, Clone, Default)]
pub struct MockVectorIndex {
    namespaces: Arc<Mutex<HashMap<String, Vec<VectorRecord>>>>,
    query_calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a passage embedded with [`MockEmbedder::vector_for`]
    pub async fn add_document(&self, namespace: &str, id: &str, content: &str, source: &str) {
        let mut metadata = Map::new();
        metadata.insert("text".to_string(), Value::String(content.to_string()));
        metadata.insert("source".to_string(), Value::String(source.to_string()));

        let record = VectorRecord {
            id: id.to_string(),
            values: MockEmbedder::vector_for(content),
            metadata,
        };
        self.upsert(vec![record], namespace).await.ok();
    }

    pub async fn namespace_len(&self, namespace: &str) -> usize {
        self.namespaces
            .lock()
            .await
            .get(namespace)
            .map_or(0, |records| records.len())
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::upstream("mock-index", "simulated outage"));
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MockVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredDocument>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let namespaces = self.namespaces.lock().await;
        let Some(records) = namespaces.get(namespace.unwrap_or(DEFAULT_NAMESPACE)) else {
            return Ok(vec![]);
        };

        let mut scored: Vec<ScoredDocument> = records
            .iter()
            .map(|record| {
                let mut metadata = record.metadata.clone();
                let content = match metadata.remove("text") {
                    Some(Value::String(text)) => text,
                    _ => String::new(),
                };
                ScoredDocument {
                    id: record.id.clone(),
                    content,
                    metadata,
                    score: Some(cosine(vector, &record.values)),
                }
            })
            .collect();

        // Ties keep insertion order
        scored.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        self.check()?;

        let count = records.len();
        let mut namespaces = self.namespaces.lock().await;
        let stored = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            stored.retain(|existing| existing.id != record.id);
            stored.push(record);
        }
        Ok(count)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.check()?;
        self.namespaces.lock().await.remove(namespace);
        Ok(())
    }
}

/// Mock control plane returning one shared index
#[derive(Debug, Clone)]
pub struct MockIndexConnector {
    index: MockVectorIndex,
    connect_calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl MockIndexConnector {
    pub fn new(index: MockVectorIndex) -> Self {
        Self {
            index,
            connect_calls: Arc::new(AtomicUsize::new(0)),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn index(&self) -> &MockVectorIndex {
        &self.index
    }
}

#[async_trait]
impl IndexConnector for MockIndexConnector {
    async fn connect(&self, _index: &str) -> Result<Arc<dyn VectorIndex>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(Arc::new(self.index.clone()))
    }
}

/// Mock completion provider
#[derive(Debug, Clone)]
pub struct MockCompletion {
    model: String,
    response: Arc<Mutex<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
    complete_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockCompletion {
    /// Provider that answers every prompt with `response`
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            model: "mock-chat".to_string(),
            response: Arc::new(Mutex::new(response.into())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            complete_calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub async fn set_response(&self, response: impl Into<String>) {
        *self.response.lock().await = response.into();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub async fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().await.last().cloned()
    }

    async fn record(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::upstream("mock-chat", "simulated outage"));
        }
        Ok(self.response.lock().await.clone())
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt).await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.record(prompt).await?;

        let tokens: Vec<Result<String>> = response
            .split_inclusive(' ')
            .map(|token| Ok(token.to_string()))
            .collect();
        Ok(stream::iter(tokens).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_for_is_deterministic_and_normalized() {
        let a = MockEmbedder::vector_for("Example Domain is for examples");
        let b = MockEmbedder::vector_for("Example Domain is for examples");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(MockEmbedder::vector_for("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_index_ranks_by_similarity() {
        let index = MockVectorIndex::new();
        index
            .add_document("dev", "1", "rust ownership and borrowing", "https://a")
            .await;
        index
            .add_document("dev", "2", "tokio runtime scheduling", "https://b")
            .await;

        let query = MockEmbedder::vector_for("tokio runtime");
        let docs = index.query(&query, 1, Some("dev")).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source(), Some("https://b"));
        assert_eq!(docs[0].content, "tokio runtime scheduling");
        assert!(index.query(&query, 5, Some("prod")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_streams_whole_response() {
        let completion = MockCompletion::new("grounded answer here");
        let tokens: Vec<String> = completion
            .stream_complete("prompt")
            .await
            .unwrap()
            .map(|token| token.unwrap())
            .collect()
            .await;

        assert_eq!(tokens, vec!["grounded ", "answer ", "here"]);
        assert_eq!(completion.stream_calls(), 1);
        assert_eq!(completion.last_prompt().await.as_deref(), Some("prompt"));
    }
}
