pub mod admin;
pub mod answer;
pub mod chat;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod keys;
pub mod providers;
pub mod registry;
pub mod retrieval;

pub use admin::{
    load_ingest_file, AdminError, AdminResponse, IngestDocument, IngestReport, IngestRequest,
    NamespacePurgeReport, PurgeReport, RagAdmin,
};
pub use answer::{CachedAnswer, TokenCallback, FALLBACK_ANSWER, REPLAY_CHUNK_CHARS};
pub use chat::{ChatOrchestrator, ChatOutcome, ChatStage, DebugRetrieval};
pub use config::{CacheSettings, RagConfig, TierSettings};
pub use embeddings::CachedEmbeddings;
pub use error::{ErrorCode, RagError, Result};
pub use providers::{
    CompletionProvider, EmbeddingProvider, IndexConnector, ScoredDocument, VectorIndex,
    VectorRecord,
};
pub use registry::{CacheRegistry, CacheScope, RegistryStats, TierStats};
pub use retrieval::{RetrievalResult, RetrievedChunk, Retriever};
