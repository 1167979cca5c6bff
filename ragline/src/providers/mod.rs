//! External collaborators: embeddings, vector search and completions.
//!
//! Each seam is a trait so the chat pipeline can run against the hosted
//! services ([`openai`], [`pinecone`]) or the deterministic in-memory
//! doubles in [`mock`].

pub mod mock;
pub mod openai;
pub mod pinecone;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub use mock::{MockCompletion, MockEmbedder, MockIndexConnector, MockVectorIndex};
pub use openai::OpenAiClient;
pub use pinecone::{PineconeClient, PineconeIndex};

/// Namespace the vector store uses when a request names none
pub const DEFAULT_NAMESPACE: &str = "__default__";

/// Text embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, part of every embedding cache key
    fn model(&self) -> &str;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed documents, one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A document returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Similarity score, when the store reports one
    pub score: Option<f32>,
}

impl ScoredDocument {
    /// The `source` metadata field, when it is a string
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// A vector to write into the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Data-plane handle on one vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest neighbours of `vector`, best first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredDocument>>;

    /// Insert or overwrite records, returning how many were written
    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize>;

    /// Delete every vector in `namespace`
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

/// Control-plane lookup that yields a [`VectorIndex`] by name.
///
/// Connecting may involve a network round trip; the retriever cache tier
/// exists so this happens once per configuration.
#[async_trait]
pub trait IndexConnector: Send + Sync {
    async fn connect(&self, index: &str) -> Result<Arc<dyn VectorIndex>>;
}

/// Language-model completion service
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Complete `prompt` in one response
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete `prompt`, yielding text fragments as they arrive
    async fn stream_complete(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;
}
