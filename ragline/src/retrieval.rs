//! Similarity retrieval and context formatting

use crate::error::Result;
use crate::providers::{EmbeddingProvider, ScoredDocument, VectorIndex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Sources kept after de-duplication
pub const MAX_SOURCES: usize = 3;

/// Sources kept after keyword narrowing
pub const MAX_CITATIONS: usize = 2;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// A passage returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Passages, their sources and the prompt-ready context for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    /// De-duplicated in first-seen order
    pub sources: Vec<String>,
    pub context_text: String,
}

/// Turn ranked documents into chunks, capped sources and formatted context
pub fn normalize_retrieval(docs: &[ScoredDocument]) -> RetrievalResult {
    let chunks: Vec<RetrievedChunk> = docs
        .iter()
        .map(|doc| RetrievedChunk {
            content: doc.content.clone(),
            source: doc.source().map(str::to_string),
            metadata: doc.metadata.clone(),
        })
        .collect();

    let mut sources: Vec<String> = Vec::new();
    for source in chunks.iter().filter_map(|c| c.source.as_ref()) {
        if !sources.contains(source) {
            sources.push(source.clone());
        }
    }
    sources.truncate(MAX_SOURCES);

    RetrievalResult {
        chunks,
        sources,
        context_text: format_context(docs),
    }
}

/// Render documents as numbered, source-labelled blocks
pub fn format_context(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[#{}] source: {}\n{}",
                i + 1,
                doc.source().unwrap_or("unknown"),
                doc.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Question words of four or more letters, lowercased
fn keywords(question: &str) -> Vec<String> {
    question
        .to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|word| word.len() >= 4)
        .map(str::to_string)
        .collect()
}

/// Sources of chunks that mention a question keyword, at most `max`
pub fn pick_citations_by_keyword(question: &str, chunks: &[RetrievedChunk], max: usize) -> Vec<String> {
    let keywords = keywords(question);
    let mut picked: Vec<String> = Vec::new();

    for chunk in chunks {
        let Some(source) = &chunk.source else {
            continue;
        };
        if picked.contains(source) {
            continue;
        }

        let content = chunk.content.to_lowercase();
        if keywords.iter().any(|k| content.contains(k.as_str())) {
            picked.push(source.clone());
        }
        if picked.len() >= max {
            break;
        }
    }

    picked
}

/// Normalize documents and narrow sources to those relevant to `question`
pub fn build_retrieval(question: &str, docs: &[ScoredDocument]) -> RetrievalResult {
    let mut result = normalize_retrieval(docs);

    let picked = pick_citations_by_keyword(question, &result.chunks, MAX_CITATIONS);
    if picked.is_empty() {
        result.sources.truncate(MAX_CITATIONS);
    } else {
        result.sources = picked;
    }

    result
}

/// Similarity search bound to one index, namespace and result count
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    namespace: Option<String>,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        namespace: Option<String>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            namespace,
            top_k,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Ranked documents for `question`, best first
    pub async fn search(&self, question: &str) -> Result<Vec<ScoredDocument>> {
        let vector = self.embedder.embed_query(question).await?;
        let docs = self
            .index
            .query(&vector, self.top_k, self.namespace())
            .await?;

        debug!(
            namespace = ?self.namespace,
            top_k = self.top_k,
            "Retrieved {} documents",
            docs.len()
        );
        Ok(docs)
    }

    /// Search and normalize into a [`RetrievalResult`]
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        let docs = self.search(question).await?;
        Ok(build_retrieval(question, &docs))
    }
}

impl fmt::Debug for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("embedding_model", &self.embedder.model())
            .field("namespace", &self.namespace)
            .field("top_k", &self.top_k)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str, source: Option<&str>) -> ScoredDocument {
        let mut metadata = Map::new();
        if let Some(source) = source {
            metadata.insert("source".into(), Value::String(source.into()));
        }
        ScoredDocument {
            id: content.into(),
            content: content.into(),
            metadata,
            score: None,
        }
    }

    #[test]
    fn test_format_context() {
        let docs = vec![
            doc("  first passage \n", Some("https://a")),
            doc("second passage", None),
        ];

        assert_eq!(
            format_context(&docs),
            "[#1] source: https://a\nfirst passage\n\n---\n\n[#2] source: unknown\nsecond passage"
        );
    }

    #[test]
    fn test_sources_deduplicated_and_capped() {
        let docs = vec![
            doc("a", Some("s1")),
            doc("b", Some("s1")),
            doc("c", None),
            doc("d", Some("s2")),
            doc("e", Some("s3")),
            doc("f", Some("s4")),
        ];

        let result = normalize_retrieval(&docs);
        assert_eq!(result.chunks.len(), 6);
        assert_eq!(result.sources, vec!["s1", "s2", "s3"]);
        assert_eq!(result.chunks[2].source, None);
    }

    #[test]
    fn test_keyword_citations() {
        let docs = vec![
            doc("Unrelated text about cooking", Some("s1")),
            doc("The domain example.com is reserved", Some("s2")),
            doc("Another reserved domain", Some("s3")),
            doc("Reserved again", Some("s4")),
        ];

        let result = build_retrieval("Why is the domain reserved?", &docs);
        assert_eq!(result.sources, vec!["s2", "s3"]);
    }

    #[test]
    fn test_keyword_fallback_uses_first_sources() {
        let docs = vec![
            doc("alpha", Some("s1")),
            doc("beta", Some("s2")),
            doc("gamma", Some("s3")),
        ];

        // No keyword of four or more letters matches
        let result = build_retrieval("Who?", &docs);
        assert_eq!(result.sources, vec!["s1", "s2"]);
    }

    #[test]
    fn test_keywords_split_on_non_alphanumerics() {
        assert_eq!(
            keywords("What is EXAMPLE.com used for, in 2024?"),
            vec!["what", "example", "used", "2024"]
        );
    }
}
