//! # Recommend
//!
//! Recommends papers from a library that resemble the ones a reader already
//! liked. Candidates are ranked by cosine similarity to the centroid of the
//! reference embeddings, and each batch mixes the best matches with a few
//! near misses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Recommender                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DocumentSource ──► CachedProvider ──► scorer ──► Diversity     │
//! │   (references,       (embeddings)     (centroid,   Sampler      │
//! │    candidates)                         cosine)        │         │
//! │                                                       ▼         │
//! │                                         RecommendationSink      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paperrec_recommend::{DirectorySource, RecommendConfig, Recommender};
//!
//! let recommender = Recommender::from_config(&RecommendConfig::default()).await?;
//! let source = DirectorySource::new("~/papers/starred", "~/papers");
//! let report = recommender.recommend_from_source(&source).await?;
//! ```

pub mod config;
pub mod diversity;
pub mod document;
pub mod engine;
pub mod error;
pub mod scorer;
pub mod sink;
pub mod source;

pub use config::{EmbeddingConfig, EmbeddingProviderType, RecommendConfig, SamplingConfig};
pub use diversity::DiversitySampler;
pub use document::{Document, ScoredCandidate};
pub use engine::{RecommendRequest, RecommendationReport, Recommender, TopK, resolve_top_k};
pub use error::{RecommendError, Result};
pub use sink::{DuplicateRelocator, RecommendationSink, SinkReport};
pub use source::{DirectorySource, DocumentSource, InMemorySource};

// Re-export from dependencies for convenience
pub use paperrec_embeddings::{CachedProvider, EmbeddingCache, EmbeddingProvider};
