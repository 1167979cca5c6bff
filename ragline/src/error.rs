//! Error types for the chat pipeline and its administrative surface

use ragline_cache::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for ragline operations.
///
/// `Clone` so that one failed singleflight computation can be handed to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    /// A required input was absent or empty
    #[error("Missing parameter: {0}")]
    MissingParam(String),

    /// An input was present but malformed or out of range
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Unrecognized cache purge scope
    #[error("Invalid scope '{0}'. Allowed: all | retrieval | retriever | embeddings | answer")]
    InvalidScope(String),

    /// An embedding, search or completion call failed
    #[error("{service} request failed: {message}")]
    Upstream { service: String, message: String },

    /// A destructive operation was blocked by a safety check
    #[error("Purge refused: {0}")]
    PurgeRefused(String),

    /// Cache construction or factory failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Environment or settings could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    /// Wrap a failure reported by an external service
    pub fn upstream(service: impl Into<String>, err: impl fmt::Display) -> Self {
        RagError::Upstream {
            service: service.into(),
            message: err.to_string(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RagError::MissingParam(_) => ErrorCode::MissingParam,
            RagError::InvalidParam(_) | RagError::Cache(_) | RagError::Config(_) => {
                ErrorCode::InvalidParam
            }
            RagError::InvalidScope(_) => ErrorCode::InvalidScope,
            RagError::Upstream { .. } => ErrorCode::UpstreamFailed,
            RagError::PurgeRefused(_) => ErrorCode::PurgeRefused,
        }
    }
}

/// Error taxonomy exposed to callers of administrative entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingParam,
    InvalidParam,
    InvalidScope,
    UpstreamFailed,
    PurgeRefused,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingParam => "MISSING_PARAM",
            Self::InvalidParam => "INVALID_PARAM",
            Self::InvalidScope => "INVALID_SCOPE",
            Self::UpstreamFailed => "UPSTREAM_FAILED",
            Self::PurgeRefused => "PURGE_REFUSED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for ragline operations
pub type Result<T> = std::result::Result<T, RagError>;
