//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Input cannot be processed (empty reference set and the like).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The underlying model could not be initialized.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Loading or saving the persistent cache failed.
    #[error("cache persistence error: {0}")]
    CachePersistence(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Whether this error belongs to the invalid-input class (bad arguments
    /// or mixed embedding dimensions).
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            EmbeddingError::InvalidInput(_) | EmbeddingError::DimensionMismatch { .. }
        )
    }
}
