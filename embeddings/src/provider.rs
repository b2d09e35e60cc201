//! Embedding providers.
//!
//! A provider turns text into a fixed-dimension vector. Three backends ship
//! with the crate: a deterministic local [`HashingProvider`], the OpenAI
//! embeddings API ([`crate::OpenAIProvider`]) and, behind the
//! `local-fastembed` feature, local sentence-transformer models. Expensive
//! backends are wrapped in [`LazyProvider`] so the model is only loaded when
//! the first text is embedded.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,

    /// Model to use (provider-specific).
    pub model: Option<String>,

    /// Dimensions for the output (if supported by provider).
    pub dimensions: Option<usize>,
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            dimensions: None,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Response from embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Dimension of the embedding.
    pub dimension: usize,

    /// Token usage (if available).
    pub tokens_used: Option<u64>,
}

impl EmbeddingResponse {
    /// Wrap a vector produced by `model`.
    pub fn new(embedding: Embedding, model: impl Into<String>) -> Self {
        Self {
            dimension: embedding.len(),
            embedding,
            model: model.into(),
            tokens_used: None,
        }
    }
}

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a fixed model configuration and
/// must produce vectors of [`EmbeddingProvider::default_dimension`] entries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the embedding dimension.
    fn default_dimension(&self) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.embed(request).await?);
        }
        Ok(results)
    }

    /// Check if the provider is available (API key set, etc.).
    fn is_available(&self) -> bool;
}

#[async_trait]
impl<T> EmbeddingProvider for Arc<T>
where
    T: EmbeddingProvider + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn default_model(&self) -> &str {
        (**self).default_model()
    }

    fn default_dimension(&self) -> usize {
        (**self).default_dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        (**self).embed(request).await
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        (**self).embed_batch(requests).await
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Default dimension of the hashing model, matching all-MiniLM-L6-v2.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Deterministic bag-of-words model that needs no download or network.
///
/// Every lower-cased alphanumeric token is hashed with SHA-256 into one
/// signed bucket of the output vector, which is then L2-normalized. Texts
/// sharing vocabulary point in similar directions. Empty text yields the
/// zero vector.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    model: String,
}

impl HashingProvider {
    /// Create a hashing provider with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("hashing-{dimension}"),
        }
    }

    /// Embed `text` synchronously.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse::new(
            self.embed_text(&request.text),
            self.model.clone(),
        ))
    }

    fn is_available(&self) -> bool {
        true
    }
}

type Loader<P> = Arc<dyn Fn() -> Result<P> + Send + Sync>;

/// Defers construction of an expensive provider until the first embedding
/// request.
///
/// The loader runs on a blocking thread and succeeds at most once per
/// `LazyProvider` instance; concurrent first callers wait for the same load.
/// A failed load surfaces as [`EmbeddingError::ProviderUnavailable`] and is
/// attempted again on the next call.
pub struct LazyProvider<P> {
    name: String,
    model: String,
    dimension: usize,
    loader: Loader<P>,
    inner: OnceCell<P>,
}

impl<P> LazyProvider<P>
where
    P: EmbeddingProvider + 'static,
{
    /// Describe the provider up front; `loader` builds it on first use.
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        loader: impl Fn() -> Result<P> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            dimension,
            loader: Arc::new(loader),
            inner: OnceCell::new(),
        }
    }

    /// Whether the underlying provider has been built.
    pub fn is_loaded(&self) -> bool {
        self.inner.initialized()
    }

    async fn provider(&self) -> Result<&P> {
        self.inner
            .get_or_try_init(|| async {
                info!("Loading embedding model: {}", self.model);
                let loader = Arc::clone(&self.loader);
                let provider = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| {
                        EmbeddingError::ProviderUnavailable(format!("model loader failed: {e}"))
                    })?
                    .map_err(|e| match e {
                        EmbeddingError::ProviderUnavailable(_) => e,
                        other => EmbeddingError::ProviderUnavailable(other.to_string()),
                    })?;
                debug!("Embedding model {} ready", self.model);
                Ok::<P, EmbeddingError>(provider)
            })
            .await
    }
}

#[async_trait]
impl<P> EmbeddingProvider for LazyProvider<P>
where
    P: EmbeddingProvider + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn default_dimension(&self) -> usize {
        self.inner
            .get()
            .map_or(self.dimension, EmbeddingProvider::default_dimension)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        self.provider().await?.embed(request).await
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        self.provider().await?.embed_batch(requests).await
    }

    fn is_available(&self) -> bool {
        self.inner.get().is_none_or(EmbeddingProvider::is_available)
    }
}
