//! Pinecone vector index over HTTP
//!
//! Connecting resolves the index's data-plane host through the control
//! plane; queries, upserts and deletes then go to that host directly.
//! Passage text lives in the `text` metadata field.

use crate::error::{RagError, Result};
use crate::providers::{IndexConnector, ScoredDocument, VectorIndex, VectorRecord};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SERVICE: &str = "pinecone";
const DEFAULT_CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

/// Metadata field holding the passage text
pub const TEXT_FIELD: &str = "text";

/// Control-plane client
#[derive(Debug, Clone)]
pub struct PineconeClient {
    client: Client,
    api_key: String,
    control_plane_url: String,
}

/// Data-plane handle on one index
#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    host: String,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    delete_all: bool,
    namespace: &'a str,
}

impl PineconeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_control_plane(api_key, DEFAULT_CONTROL_PLANE_URL)
    }

    pub fn with_control_plane(api_key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            control_plane_url: url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the data-plane host for `index`
    pub async fn describe_host(&self, index: &str) -> Result<String> {
        let url = format!("{}/indexes/{}", self.control_plane_url, index);

        let response = self
            .client
            .get(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        let response = check_status(response, "describe index").await?;
        let described: DescribeIndexResponse = response
            .json()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        Ok(described.host)
    }
}

#[async_trait]
impl IndexConnector for PineconeClient {
    async fn connect(&self, index: &str) -> Result<Arc<dyn VectorIndex>> {
        let host = self.describe_host(index).await?;
        info!(index, host = %host, "Connected to Pinecone index");

        Ok(Arc::new(PineconeIndex::new(
            self.client.clone(),
            self.api_key.clone(),
            host,
        )))
    }
}

impl PineconeIndex {
    pub fn new(client: Client, api_key: String, host: impl Into<String>) -> Self {
        let host = host.into();
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };

        Self {
            client,
            api_key,
            host: host.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        check_status(response, path).await
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<ScoredDocument>> {
        let request = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata: true,
        };

        let response: QueryResponse = self
            .post("query", &request)
            .await?
            .json()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        debug!("Pinecone query returned {} matches", response.matches.len());
        Ok(response.matches.into_iter().map(into_document).collect())
    }

    async fn upsert(&self, records: Vec<VectorRecord>, namespace: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let request = UpsertRequest {
            vectors: &records,
            namespace,
        };
        let response: UpsertResponse = self
            .post("vectors/upsert", &request)
            .await?
            .json()
            .await
            .map_err(|e| RagError::upstream(SERVICE, e))?;

        Ok(response.upserted_count)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let request = DeleteRequest {
            delete_all: true,
            namespace,
        };
        self.post("vectors/delete", &request).await?;
        Ok(())
    }
}

fn into_document(m: QueryMatch) -> ScoredDocument {
    let mut metadata = m.metadata.unwrap_or_default();
    let content = match metadata.remove(TEXT_FIELD) {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };

    ScoredDocument {
        id: m.id,
        content,
        metadata,
        score: m.score,
    }
}

async fn check_status(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(RagError::upstream(
        SERVICE,
        format!("{} returned {}: {}", operation, status, error_text),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_moves_text_out_of_metadata() {
        let m: QueryMatch = serde_json::from_value(json!({
            "id": "a",
            "score": 0.5,
            "metadata": {"text": "Example Domain", "source": "https://example.com"}
        }))
        .unwrap();

        let doc = into_document(m);
        assert_eq!(doc.content, "Example Domain");
        assert_eq!(doc.source(), Some("https://example.com"));
        assert!(!doc.metadata.contains_key(TEXT_FIELD));
        assert_eq!(doc.score, Some(0.5));
    }

    #[test]
    fn test_query_request_shape() {
        let vector = [0.5f32, 0.25];
        let body = serde_json::to_value(QueryRequest {
            vector: &vector,
            top_k: 6,
            namespace: None,
            include_metadata: true,
        })
        .unwrap();

        assert_eq!(body["topK"], 6);
        assert_eq!(body["includeMetadata"], true);
        assert!(body.get("namespace").is_none());
    }

    #[test]
    fn test_delete_request_shape() {
        let body = serde_json::to_value(DeleteRequest {
            delete_all: true,
            namespace: "dev",
        })
        .unwrap();
        assert_eq!(body, json!({"deleteAll": true, "namespace": "dev"}));
    }

    #[test]
    fn test_host_gets_scheme() {
        let index = PineconeIndex::new(Client::new(), "k".into(), "docs-abc.svc.pinecone.io/");
        assert_eq!(index.host, "https://docs-abc.svc.pinecone.io");
    }
}
