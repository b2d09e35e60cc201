//! # Embeddings
//!
//! Text embeddings for paperrec: providers that turn document text into
//! vectors, a persistent cache keyed by document identifier, and the vector
//! math (cosine similarity, centroids) the recommender scores with.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► CachedProvider ──► Embedding            │
//! │       │                    │                  │                 │
//! │       ▼                    ▼                  ▼                 │
//! │  Hashing/OpenAI/Local  EmbeddingCache   cosine / centroid      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers obtain vectors only through [`CachedProvider::get_or_compute`]
//! and [`CachedProvider::get_or_compute_batch`].

pub mod cache;
pub mod error;
#[cfg(feature = "local-fastembed")]
pub mod local;
pub mod openai;
pub mod provider;
pub mod similarity;

pub use cache::{CacheEntry, CacheStats, CachedProvider, EmbeddingCache, FlushPolicy};
pub use error::{EmbeddingError, Result};
#[cfg(feature = "local-fastembed")]
pub use local::FastEmbedProvider;
pub use openai::OpenAIProvider;
pub use provider::{
    DEFAULT_HASHING_DIMENSION, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse,
    HashingProvider, LazyProvider,
};
pub use similarity::{centroid, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
