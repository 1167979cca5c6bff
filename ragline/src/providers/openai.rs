//! OpenAI embeddings and chat completions over HTTP
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY`: API key (required)
//! - `OPENAI_BASE_URL`: alternative endpoint for OpenAI-compatible servers

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::providers::{CompletionProvider, EmbeddingProvider};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SERVICE: &str = "openai";

/// OpenAI client usable as both embedder and completion provider.
///
/// One instance serves one embedding model and one chat model.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    chat_model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: Option<ChatStreamDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        embedding_model: impl Into<String>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            embedding_model: embedding_model.into(),
            chat_model: chat_model.into(),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(
            &config.openai_api_key,
            &config.openai_base_url,
            &config.embedding_model,
            &config.chat_model,
        )
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagError::upstream(
                SERVICE,
                format!("{} returned {}: {}", path, status, error_text),
            ));
        }

        Ok(response)
    }

    fn chat_request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            stream,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::upstream(SERVICE, "empty embedding response"))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "OpenAI embedding request: {} texts with model {}",
            texts.len(),
            self.embedding_model
        );

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse = self
            .post("embeddings", &request)
            .await?
            .json()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        if response.data.len() != texts.len() {
            return Err(RagError::upstream(
                SERVICE,
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.data.len()
                ),
            ));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response: ChatResponse = self
            .post("chat/completions", &self.chat_request(prompt, false))
            .await?
            .json()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn stream_complete(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.chat_request(prompt, true));

        let events = EventSource::new(request).map_err(|e| RagError::upstream(SERVICE, e))?;

        let tokens = stream::unfold(events, |mut es| async move {
            loop {
                match es.next().await? {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => match stream_data(&message.data) {
                        Ok(StreamData::Token(token)) => return Some((Ok(token), es)),
                        Ok(StreamData::Empty) => continue,
                        Ok(StreamData::Done) => {
                            es.close();
                            return None;
                        }
                        Err(e) => {
                            es.close();
                            return Some((Err(e), es));
                        }
                    },
                    Err(EventSourceError::StreamEnded) => return None,
                    Err(e) => {
                        // Closing stops the automatic reconnect
                        es.close();
                        return Some((Err(RagError::upstream(SERVICE, e)), es));
                    }
                }
            }
        });

        Ok(tokens.boxed())
    }
}

/// Payload of one `message` event on the completion stream
#[derive(Debug, PartialEq)]
enum StreamData {
    Token(String),
    Done,
    Empty,
}

fn stream_data(data: &str) -> Result<StreamData> {
    if data == "[DONE]" {
        return Ok(StreamData::Done);
    }

    let chunk: ChatStreamChunk = serde_json::from_str(data).map_err(|e| {
        warn!("Failed to parse stream chunk: {} | data: {}", e, data);
        RagError::upstream(SERVICE, format!("unparseable stream chunk: {}", e))
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty())
        .map_or(StreamData::Empty, StreamData::Token))
}
