//! Chat orchestration across the cache tiers
//!
//! A question passes through three tiers in order:
//!
//! 1. **Retriever**: a search handle per (index, namespace, embedding model, topK)
//! 2. **Retrieval**: ranked passages per normalized question
//! 3. **Answer**: a grounded answer per question and retrieved context
//!
//! The first two use singleflight `get_or_set`. The answer tier uses a plain
//! lookup because its two producers differ: streaming emits tokens while it
//! computes, non-streaming does not. A cached answer requested as a stream is
//! replayed in fixed-size pieces without calling the completion service.

use crate::admin::RagAdmin;
use crate::answer::{
    answer_strict, replay_answer, stream_answer_strict, CachedAnswer, TokenCallback,
};
use crate::config::RagConfig;
use crate::embeddings::CachedEmbeddings;
use crate::error::{RagError, Result};
use crate::keys::{answer_key, context_hash, retrieval_key, retriever_key};
use crate::providers::{
    CompletionProvider, EmbeddingProvider, IndexConnector, OpenAiClient, PineconeClient,
};
use crate::registry::CacheRegistry;
use crate::retrieval::{RetrievalResult, Retriever};
use ragline_cache::normalize_text;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Characters of content shown in retrieval debug output
const PREVIEW_CHARS: usize = 200;

/// Progress of one chat request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    Start,
    HaveRetriever,
    HaveRetrieval,
    HaveAnswer,
    Done,
    Failed,
}

impl ChatStage {
    /// The stage after this one; terminal stages stay put
    pub fn advance(self) -> Self {
        match self {
            Self::Start => Self::HaveRetriever,
            Self::HaveRetriever => Self::HaveRetrieval,
            Self::HaveRetrieval => Self::HaveAnswer,
            Self::HaveAnswer => Self::Done,
            Self::Done => Self::Done,
            Self::Failed => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Result of [`ChatOrchestrator::run_chat`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum ChatOutcome {
    /// Full answer returned directly
    #[serde(rename = "non-stream")]
    Answer {
        answer: String,
        citations: Vec<String>,
        /// Served from the answer tier
        cached: bool,
    },
    /// Answer delivered through the token callback
    #[serde(rename = "stream")]
    Streamed { citations: Vec<String>, cached: bool },
}

impl ChatOutcome {
    pub fn citations(&self) -> &[String] {
        match self {
            Self::Answer { citations, .. } | Self::Streamed { citations, .. } => citations,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Answer { answer, .. } => Some(answer),
            Self::Streamed { .. } => None,
        }
    }

    pub fn cached(&self) -> bool {
        match self {
            Self::Answer { cached, .. } | Self::Streamed { cached, .. } => *cached,
        }
    }
}

/// One retrieved passage in debug output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugChunk {
    pub content_preview: String,
    pub content: String,
    pub source: Option<String>,
    pub score: Option<f32>,
    pub metadata: Map<String, Value>,
}

/// Raw similarity search output for a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRetrieval {
    pub question: String,
    pub top_k: usize,
    pub namespace: Option<String>,
    pub chunks: Vec<DebugChunk>,
}

/// Answers questions from retrieved context, consulting the cache tiers first
#[derive(Clone)]
pub struct ChatOrchestrator {
    config: Arc<RagConfig>,
    registry: CacheRegistry,
    connector: Arc<dyn IndexConnector>,
    embedder: Arc<CachedEmbeddings>,
    completion: Arc<dyn CompletionProvider>,
}

impl ChatOrchestrator {
    /// Wire an orchestrator; `embedder` is wrapped with the embeddings tier
    pub fn new(
        config: RagConfig,
        registry: CacheRegistry,
        connector: Arc<dyn IndexConnector>,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        let embedder = Arc::new(CachedEmbeddings::new(embedder, registry.embeddings.clone()));

        Self {
            config: Arc::new(config),
            registry,
            connector,
            embedder,
            completion,
        }
    }

    /// Orchestrator over the hosted OpenAI and Pinecone services
    pub fn from_config(config: RagConfig, registry: CacheRegistry) -> Self {
        let openai = Arc::new(OpenAiClient::from_config(&config));
        let pinecone = Arc::new(PineconeClient::new(&config.pinecone_api_key));

        Self::new(config, registry, pinecone, openai.clone(), openai)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    /// The cached embedder shared with ingest
    pub fn embedder(&self) -> Arc<CachedEmbeddings> {
        Arc::clone(&self.embedder)
    }

    /// Administrative handle over the same caches and services
    pub fn admin(&self) -> RagAdmin {
        RagAdmin::new(
            (*self.config).clone(),
            self.registry.clone(),
            Arc::clone(&self.connector),
            self.embedder.clone(),
        )
    }

    /// Answer `question`.
    ///
    /// With `stream` set, tokens go to `on_token` and the outcome carries
    /// citations only. Streaming without a callback, or an empty question,
    /// fails before any external call. Upstream failures propagate.
    pub async fn run_chat(
        &self,
        question: &str,
        stream: bool,
        on_token: Option<TokenCallback<'_>>,
    ) -> Result<ChatOutcome> {
        if stream && on_token.is_none() {
            return Err(RagError::MissingParam(
                "onToken callback is required when streaming".to_string(),
            ));
        }

        let question = normalize_text(question);
        if question.is_empty() {
            return Err(RagError::MissingParam("question is empty".to_string()));
        }

        let mut stage = ChatStage::Start;
        let outcome = self
            .run_stages(&question, stream, on_token, &mut stage)
            .await;

        match &outcome {
            Ok(result) => {
                stage = stage.advance();
                debug!(?stage, cached = result.cached(), "Chat finished");
            }
            Err(e) => {
                debug!(failed_at = ?stage, "Chat failed: {}", e);
                stage = ChatStage::Failed;
            }
        }
        debug_assert!(stage.is_terminal());

        outcome
    }

    async fn run_stages(
        &self,
        question: &str,
        stream: bool,
        on_token: Option<TokenCallback<'_>>,
        stage: &mut ChatStage,
    ) -> Result<ChatOutcome> {
        let retriever = self.retriever().await?;
        *stage = stage.advance();
        debug!(?stage, "Retriever ready");

        let retrieval = self.retrieval(retriever, question).await?;
        *stage = stage.advance();
        debug!(?stage, chunks = retrieval.chunks.len(), "Retrieval ready");

        let key = answer_key(
            &self.config,
            self.completion.model(),
            self.registry.answer_version(),
            question,
            &context_hash(&retrieval.context_text),
        );

        if let Some(hit) = self.registry.answer.get(&key).await.into_value() {
            *stage = stage.advance();
            debug!(?stage, key = %key, "Answer served from cache");

            return Ok(match on_token {
                Some(on_token) if stream => {
                    let pieces = replay_answer(&hit.answer, on_token);
                    debug!(pieces, "Replayed cached answer");
                    ChatOutcome::Streamed {
                        citations: hit.citations,
                        cached: true,
                    }
                }
                _ => ChatOutcome::Answer {
                    answer: hit.answer,
                    citations: hit.citations,
                    cached: true,
                },
            });
        }

        let outcome = match on_token {
            Some(on_token) if stream => {
                let buffer = stream_answer_strict(
                    self.completion.as_ref(),
                    question,
                    &retrieval.context_text,
                    on_token,
                )
                .await?;

                // A stream with no text is stored as the fallback answer
                let answer = if buffer.trim().is_empty() {
                    CachedAnswer::fallback()
                } else {
                    CachedAnswer {
                        answer: buffer,
                        citations: retrieval.sources.clone(),
                    }
                };
                let citations = answer.citations.clone();
                self.registry.answer.set(key, answer, None).await;

                ChatOutcome::Streamed {
                    citations,
                    cached: false,
                }
            }
            _ => {
                let answer = answer_strict(
                    self.completion.as_ref(),
                    question,
                    &retrieval.context_text,
                    &retrieval.sources,
                )
                .await?;
                self.registry.answer.set(key, answer.clone(), None).await;

                ChatOutcome::Answer {
                    answer: answer.answer,
                    citations: answer.citations,
                    cached: false,
                }
            }
        };

        *stage = stage.advance();
        debug!(?stage, "Answer generated");
        Ok(outcome)
    }

    /// Retriever for the configured index, built once per configuration
    async fn retriever(&self) -> Result<Arc<Retriever>> {
        let connector = Arc::clone(&self.connector);
        let embedder: Arc<dyn EmbeddingProvider> = self.embedder.clone();
        let index = self.config.index.clone();
        let namespace = self.config.namespace.clone();
        let top_k = self.config.top_k;

        self.registry
            .retriever
            .get_or_set(
                retriever_key(&self.config),
                move || async move {
                    let vector_index = connector.connect(&index).await?;
                    info!(index = %index, namespace = ?namespace, top_k, "Built retriever");
                    Ok(Arc::new(Retriever::new(vector_index, embedder, namespace, top_k)))
                },
                None,
            )
            .await
    }

    async fn retrieval(
        &self,
        retriever: Arc<Retriever>,
        question: &str,
    ) -> Result<Arc<RetrievalResult>> {
        let key = retrieval_key(&self.config, self.registry.retrieval_version(), question);
        let question = question.to_string();

        self.registry
            .retrieval
            .get_or_set(
                key,
                move || async move { Ok(Arc::new(retriever.retrieve(&question).await?)) },
                None,
            )
            .await
    }

    /// Vector search only: no caches, no language model
    pub async fn debug_retrieval(&self, question: &str) -> Result<DebugRetrieval> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::MissingParam("question is empty".to_string()));
        }

        let index = self.connector.connect(&self.config.index).await?;
        let retriever = Retriever::new(
            index,
            Arc::clone(self.embedder.inner()),
            self.config.namespace.clone(),
            self.config.top_k,
        );
        let docs = retriever.search(question).await?;

        let chunks = docs
            .into_iter()
            .map(|doc| {
                let source = doc
                    .metadata
                    .get("url")
                    .and_then(Value::as_str)
                    .or_else(|| doc.source())
                    .map(str::to_string);

                DebugChunk {
                    content_preview: doc.content.chars().take(PREVIEW_CHARS).collect(),
                    content: doc.content,
                    source,
                    score: doc.score,
                    metadata: doc.metadata,
                }
            })
            .collect();

        Ok(DebugRetrieval {
            question: question.to_string(),
            top_k: self.config.top_k,
            namespace: self.config.namespace.clone(),
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut stage = ChatStage::Start;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.advance();
            seen.push(stage);
        }

        assert_eq!(
            seen,
            vec![
                ChatStage::Start,
                ChatStage::HaveRetriever,
                ChatStage::HaveRetrieval,
                ChatStage::HaveAnswer,
                ChatStage::Done,
            ]
        );
        assert_eq!(ChatStage::Failed.advance(), ChatStage::Failed);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ChatOutcome::Streamed {
            citations: vec!["https://a".into()],
            cached: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "stream");
        assert_eq!(json["citations"][0], "https://a");

        let outcome = ChatOutcome::Answer {
            answer: "Yes.".into(),
            citations: vec![],
            cached: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "non-stream");
        assert_eq!(outcome.answer(), Some("Yes."));
    }
}
