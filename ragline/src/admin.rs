//! Administrative entry points: cache purge and stats, namespace purge, ingest
//!
//! Every operation returns an [`AdminResponse`] rather than a `Result`, so
//! callers can render success and failure uniformly:
//!
//! ```json
//! {"ok": true, "purged": "answer", "stats": {...}}
//! {"ok": false, "error": {"code": "INVALID_SCOPE", "message": "..."}}
//! ```

use crate::config::RagConfig;
use crate::embeddings::CachedEmbeddings;
use crate::error::{ErrorCode, RagError, Result};
use crate::providers::{EmbeddingProvider, IndexConnector, VectorRecord, DEFAULT_NAMESPACE};
use crate::registry::{CacheRegistry, CacheScope, RegistryStats};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shorter chunks carry too little text to be worth embedding
pub const MIN_CHUNK_CHARS: usize = 50;

/// Error body of a failed administrative call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<RagError> for AdminError {
    fn from(err: RagError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of an administrative call
#[derive(Debug, Clone, PartialEq)]
pub enum AdminResponse<T> {
    Ok(T),
    Err(AdminError),
}

impl<T> AdminResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Ok(_) => None,
            Self::Err(e) => Some(e.code),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, AdminError> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(e) => Err(e),
        }
    }
}

impl<T> From<Result<T>> for AdminResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => {
                warn!(code = %e.code(), "Admin operation failed: {}", e);
                Self::Err(e.into())
            }
        }
    }
}

impl<T: Serialize> Serialize for AdminResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Ok(value) => {
                #[derive(Serialize)]
                struct Success<'a, T> {
                    ok: bool,
                    #[serde(flatten)]
                    value: &'a T,
                }
                Success { ok: true, value }.serialize(serializer)
            }
            Self::Err(error) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

/// Result of a cache purge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub purged: CacheScope,
    /// Every tier after the purge
    pub stats: RegistryStats,
}

/// Result of a vector-store namespace purge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacePurgeReport {
    pub index: String,
    pub purged_namespace: String,
    pub purged_at: DateTime<Utc>,
}

/// One pre-extracted text chunk to ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestDocument {
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default, alias = "url")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub documents: Vec<IngestDocument>,
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

impl IngestRequest {
    /// A dry-run request over `documents`
    pub fn new(documents: Vec<IngestDocument>) -> Self {
        Self {
            documents,
            max_chunks: None,
            dry_run: true,
        }
    }
}

/// A chunk that was not ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub position: usize,
    pub source: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub dry_run: bool,
    pub index: String,
    pub namespace: String,
    /// Chunks considered after applying `max_chunks`
    pub chunks_total: usize,
    /// Chunks that passed validation
    pub chunks_accepted: usize,
    /// Vectors written; zero on a dry run
    pub upserted: usize,
    /// De-duplicated sources of accepted chunks
    pub sources: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

/// Read newline-delimited JSON documents, skipping blank lines
pub async fn load_ingest_file(path: impl AsRef<Path>) -> Result<Vec<IngestDocument>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RagError::InvalidParam(format!("cannot read {}: {}", path.display(), e)))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                RagError::InvalidParam(format!("{} line {}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

/// Administrative operations over one registry and vector store
#[derive(Clone)]
pub struct RagAdmin {
    config: RagConfig,
    registry: CacheRegistry,
    connector: Arc<dyn IndexConnector>,
    embedder: Arc<CachedEmbeddings>,
}

impl RagAdmin {
    pub fn new(
        config: RagConfig,
        registry: CacheRegistry,
        connector: Arc<dyn IndexConnector>,
        embedder: Arc<CachedEmbeddings>,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
            embedder,
        }
    }

    /// Clear the tiers named by `scope` and report every tier afterwards
    pub async fn purge_caches(&self, scope: &str) -> AdminResponse<PurgeReport> {
        self.try_purge_caches(scope).await.into()
    }

    async fn try_purge_caches(&self, scope: &str) -> Result<PurgeReport> {
        let scope: CacheScope = scope.parse()?;
        self.registry.purge(scope).await;

        Ok(PurgeReport {
            purged: scope,
            stats: self.registry.stats().await,
        })
    }

    pub async fn cache_stats(&self) -> AdminResponse<RegistryStats> {
        AdminResponse::Ok(self.registry.stats().await)
    }

    /// Delete every vector in `namespace` of `index`.
    ///
    /// The default namespace is refused. On success the retrieval and answer
    /// tiers are cleared, since their entries described the deleted data.
    pub async fn purge_namespace(
        &self,
        index: &str,
        namespace: &str,
    ) -> AdminResponse<NamespacePurgeReport> {
        self.try_purge_namespace(index.trim(), namespace.trim())
            .await
            .into()
    }

    async fn try_purge_namespace(
        &self,
        index: &str,
        namespace: &str,
    ) -> Result<NamespacePurgeReport> {
        if index.is_empty() {
            return Err(RagError::MissingParam("index".to_string()));
        }
        if namespace.is_empty() {
            return Err(RagError::MissingParam("namespace".to_string()));
        }
        if namespace == DEFAULT_NAMESPACE {
            return Err(RagError::PurgeRefused(format!(
                "namespace '{}' is shared; set an explicit namespace (e.g. dev)",
                namespace
            )));
        }

        let vector_index = self.connector.connect(index).await?;
        vector_index.delete_namespace(namespace).await?;

        self.registry.purge(CacheScope::Retrieval).await;
        self.registry.purge(CacheScope::Answer).await;

        info!(index = %index, namespace = %namespace, "Purged vector namespace");
        Ok(NamespacePurgeReport {
            index: index.to_string(),
            purged_namespace: namespace.to_string(),
            purged_at: Utc::now(),
        })
    }

    /// Validate, embed and upsert pre-extracted chunks.
    ///
    /// A dry run validates only; nothing is embedded or written.
    pub async fn ingest_documents(&self, request: IngestRequest) -> AdminResponse<IngestReport> {
        self.try_ingest(request).await.into()
    }

    async fn try_ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        let index = self.config.index.trim();
        if index.is_empty() {
            return Err(RagError::MissingParam("index".to_string()));
        }
        let namespace = self.config.namespace().map(str::trim).unwrap_or_default();
        if namespace.is_empty() {
            return Err(RagError::MissingParam(
                "namespace is empty; refusing to ingest into the default namespace".to_string(),
            ));
        }
        if request.documents.is_empty() {
            return Err(RagError::MissingParam("no documents provided".to_string()));
        }
        if request.max_chunks == Some(0) {
            return Err(RagError::InvalidParam(
                "max_chunks must be a positive integer".to_string(),
            ));
        }

        let limit = request.max_chunks.unwrap_or(request.documents.len());
        let considered: Vec<IngestDocument> = request.documents.into_iter().take(limit).collect();

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        for (position, doc) in considered.iter().enumerate() {
            let chars = doc.content.trim().chars().count();
            if chars < MIN_CHUNK_CHARS {
                failures.push(IngestFailure {
                    position,
                    source: doc.source.clone(),
                    reason: format!("content too short ({} < {} chars)", chars, MIN_CHUNK_CHARS),
                });
                continue;
            }
            accepted.push(doc);
        }

        let mut sources: Vec<String> = Vec::new();
        for source in accepted.iter().filter_map(|doc| doc.source.as_ref()) {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }

        let upserted = if request.dry_run || accepted.is_empty() {
            0
        } else {
            self.upsert(index, namespace, &accepted).await?
        };

        info!(
            index = %index,
            namespace = %namespace,
            dry_run = request.dry_run,
            accepted = accepted.len(),
            failed = failures.len(),
            upserted,
            "Ingest finished"
        );

        Ok(IngestReport {
            dry_run: request.dry_run,
            index: index.to_string(),
            namespace: namespace.to_string(),
            chunks_total: considered.len(),
            chunks_accepted: accepted.len(),
            upserted,
            sources,
            failures,
        })
    }

    async fn upsert(&self, index: &str, namespace: &str, docs: &[&IngestDocument]) -> Result<usize> {
        let texts: Vec<String> = docs.iter().map(|doc| doc.content.trim().to_string()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;

        let records = texts
            .into_iter()
            .zip(vectors)
            .zip(docs)
            .map(|((text, values), doc)| {
                let mut metadata = Map::new();
                if let Some(source) = &doc.source {
                    metadata.insert("source".to_string(), Value::String(source.clone()));
                }
                metadata.insert("text".to_string(), Value::String(text));

                VectorRecord {
                    id: Uuid::new_v4().to_string(),
                    values,
                    metadata,
                }
            })
            .collect();

        let vector_index = self.connector.connect(index).await?;
        vector_index.upsert(records, namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_is_flattened() {
        let response = AdminResponse::Ok(NamespacePurgeReport {
            index: "idx".into(),
            purged_namespace: "dev".into(),
            purged_at: Utc::now(),
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["purgedNamespace"], "dev");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let response =
            AdminResponse::from(Result::<PurgeReport>::Err(RagError::InvalidScope("bogus".into())));

        assert_eq!(response.error_code(), Some(ErrorCode::InvalidScope));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "INVALID_SCOPE");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("bogus"));
    }

    #[test]
    fn test_ingest_request_defaults_to_dry_run() {
        let request: IngestRequest =
            serde_json::from_value(json!({"documents": [{"text": "hello", "url": "https://a"}]}))
                .unwrap();

        assert!(request.dry_run);
        assert_eq!(request.max_chunks, None);
        assert_eq!(request.documents[0].content, "hello");
        assert_eq!(request.documents[0].source.as_deref(), Some("https://a"));
    }

    #[tokio::test]
    async fn test_load_ingest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        tokio::fs::write(
            &path,
            "{\"content\":\"first\",\"source\":\"s1\"}\n\n{\"text\":\"second\"}\n",
        )
        .await
        .unwrap();

        let docs = load_ingest_file(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].content, "second");
        assert_eq!(docs[1].source, None);
    }

    #[tokio::test]
    async fn test_load_ingest_file_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        tokio::fs::write(&path, "{\"content\":\"ok\"}\nnot json\n")
            .await
            .unwrap();

        let err = load_ingest_file(&path).await.unwrap_err();
        assert!(matches!(&err, RagError::InvalidParam(m) if m.contains("line 2")));
    }
}
