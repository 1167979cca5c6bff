//! Error types for cache operations
//!
//! Construction-time violations are reported as [`CacheError::InvalidConfig`].
//! The remaining variants describe a `get_or_set` factory that never produced
//! a value; they are delivered to every waiter of that computation.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Configuration rejected at construction time
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// The factory panicked while computing a value
    #[error("Cache factory panicked while computing key {key}")]
    FactoryPanicked { key: String },

    /// The factory task was cancelled before it finished
    #[error("Cache factory aborted before completing key {key}")]
    FactoryAborted { key: String },
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
