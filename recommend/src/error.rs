//! Error types for the recommender.

use paperrec_embeddings::EmbeddingError;
use thiserror::Error;

/// Result type alias for recommender operations.
pub type Result<T> = std::result::Result<T, RecommendError>;

/// Errors that can occur while producing recommendations.
#[derive(Error, Debug)]
pub enum RecommendError {
    /// Bad arguments: empty reference set, mixed embedding dimensions, an
    /// out-of-range surprise factor.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding model could not be initialized.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Any other embedding failure.
    #[error("embedding error: {0}")]
    Embedding(EmbeddingError),

    /// The document source failed.
    #[error("document source error: {0}")]
    Source(String),

    /// A post-processing sink failed.
    #[error("sink error: {0}")]
    Sink(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EmbeddingError> for RecommendError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::ProviderUnavailable(msg) => RecommendError::ProviderUnavailable(msg),
            err if err.is_invalid_input() => RecommendError::InvalidInput(err.to_string()),
            err => RecommendError::Embedding(err),
        }
    }
}
