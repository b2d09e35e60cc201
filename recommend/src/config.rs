//! Configuration for the recommender.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use paperrec_embeddings::{
    DEFAULT_HASHING_DIMENSION, EmbeddingProvider, FlushPolicy, HashingProvider, LazyProvider,
    OpenAIProvider,
};
use serde::{Deserialize, Serialize};

use crate::error::{RecommendError, Result};

/// Default fraction of candidates recommended when no explicit count is set.
pub const DEFAULT_TOP_K_PERCENT: f64 = 0.20;

/// Smallest batch produced by percentage-based sizing.
pub const DEFAULT_MIN_TOP_K: usize = 5;

/// Default share of a batch drawn from the near-miss tier.
pub const DEFAULT_SURPRISE: f64 = 0.2;

/// Top-level recommender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Where the embedding cache is persisted.
    pub cache_path: PathBuf,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Batch sizing and surprise sampling.
    pub sampling: SamplingConfig,
}

impl RecommendConfig {
    /// Create a configuration with default values and the given cache path.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            embedding: EmbeddingConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }

    /// Read a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RecommendError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the sampling configuration.
    pub fn with_sampling(mut self, config: SamplingConfig) -> Self {
        self.sampling = config;
        self
    }

    /// Reject values the recommender cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.sampling.validate()
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self::new(
            dirs::cache_dir()
                .unwrap_or_default()
                .join("paperrec/embeddings_cache.json"),
        )
    }
}

/// Configuration for the embedding provider and its cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model to use for embeddings (provider default when unset).
    pub model: Option<String>,

    /// Output dimension override.
    pub dimensions: Option<usize>,

    /// Whether to persist embeddings between runs.
    pub cache_enabled: bool,

    /// Maximum cache size.
    pub cache_max_entries: Option<usize>,

    /// Provider batch calls in flight at once.
    pub concurrency: usize,

    /// Texts per provider batch call.
    pub batch_size: usize,

    /// When new embeddings are written to disk.
    pub flush: FlushPolicy,
}

impl EmbeddingConfig {
    /// Set the provider.
    pub fn with_provider(mut self, provider: EmbeddingProviderType) -> Self {
        self.provider = provider;
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RecommendError::Config(
                "embedding.concurrency must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(RecommendError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.dimensions == Some(0) {
            return Err(RecommendError::Config(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured provider. Model-backed providers are returned
    /// unloaded and initialize on their first embedding request.
    pub fn create_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            EmbeddingProviderType::Hashing => Ok(Arc::new(HashingProvider::new(
                self.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSION),
            ))),
            EmbeddingProviderType::OpenAI => {
                let model = self
                    .model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".to_string());
                let dimensions = self.dimensions;
                let dimension =
                    dimensions.unwrap_or_else(|| OpenAIProvider::model_dimension(&model));
                let loader_model = model.clone();
                Ok(Arc::new(LazyProvider::new(
                    "openai",
                    model,
                    dimension,
                    move || {
                        let provider = OpenAIProvider::from_env()?.with_model(loader_model.clone());
                        Ok(match dimensions {
                            Some(dims) => provider.with_dimensions(dims),
                            None => provider,
                        })
                    },
                )))
            }
            EmbeddingProviderType::Local => self.create_local_provider(),
        }
    }

    #[cfg(feature = "local-fastembed")]
    fn create_local_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        use paperrec_embeddings::FastEmbedProvider;
        use paperrec_embeddings::local::{DEFAULT_LOCAL_MODEL, resolve_model};

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let (_, dimension) = resolve_model(&model)?;
        let loader_model = model.clone();
        Ok(Arc::new(LazyProvider::new(
            "local",
            model,
            dimension,
            move || FastEmbedProvider::load(&loader_model),
        )))
    }

    #[cfg(not(feature = "local-fastembed"))]
    fn create_local_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(RecommendError::Config(
            "the local embedding provider requires the `local-fastembed` feature".to_string(),
        ))
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Hashing,
            model: None,
            dimensions: None,
            cache_enabled: true,
            cache_max_entries: None,
            concurrency: 4,
            batch_size: 32,
            flush: FlushPolicy::EveryPut,
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Deterministic local hashing model.
    Hashing,
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Local sentence-transformer model (fastembed).
    Local,
}

impl FromStr for EmbeddingProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAI),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "unknown embedding provider `{other}` (expected hashing, openai or local)"
            )),
        }
    }
}

/// How many candidates to recommend and how adventurous to be.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Exact batch size; overrides `top_k_percent` when set.
    pub top_k: Option<usize>,

    /// Fraction of candidates to recommend.
    pub top_k_percent: f64,

    /// Floor applied to percentage-based sizing.
    pub min_top_k: usize,

    /// Share of the batch drawn from just outside the top-k (0.0 to 1.0).
    pub surprise: f64,

    /// Score only a random sample of this many candidates.
    pub subsample: Option<usize>,

    /// Seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl SamplingConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.surprise) {
            return Err(RecommendError::InvalidInput(format!(
                "surprise must be within [0, 1], got {}",
                self.surprise
            )));
        }
        if !(self.top_k_percent > 0.0 && self.top_k_percent <= 1.0) {
            return Err(RecommendError::InvalidInput(format!(
                "top_k_percent must be within (0, 1], got {}",
                self.top_k_percent
            )));
        }
        Ok(())
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            top_k: None,
            top_k_percent: DEFAULT_TOP_K_PERCENT,
            min_top_k: DEFAULT_MIN_TOP_K,
            surprise: DEFAULT_SURPRISE,
            subsample: None,
            seed: None,
        }
    }
}
