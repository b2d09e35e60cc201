//! Local sentence-transformer models via fastembed.
//!
//! Model weights are downloaded on first load and run on the bundled ONNX
//! runtime. Construct through [`crate::LazyProvider`] so the load happens on
//! the first embedding request only.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Default local model.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Map a configured model name to a fastembed model and its dimension.
pub fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        other => Err(EmbeddingError::ProviderUnavailable(format!(
            "unknown local embedding model: {other}"
        ))),
    }
}

/// Local fastembed provider.
pub struct FastEmbedProvider {
    model_name: String,
    dimension: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Load `model_name`, downloading weights if needed. Blocking.
    pub fn load(model_name: &str) -> Result<Self> {
        let (model, dimension) = resolve_model(model_name)?;
        info!("Initializing local embedding model {model_name}");
        let embedding = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| {
            EmbeddingError::ProviderUnavailable(format!(
                "failed to initialize local embedding model: {e}"
            ))
        })?;

        Ok(Self {
            model_name: model_name.to_string(),
            dimension,
            model: Arc::new(Mutex::new(embedding)),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::InvalidResponse(format!("local embedding failed: {e}")))
        })
        .await
        .map_err(|e| EmbeddingError::ProviderUnavailable(format!("embedding task failed: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn default_model(&self) -> &str {
        &self.model_name
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let embedding = self
            .run(vec![request.text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("Empty embedding response".to_string()))?;
        Ok(EmbeddingResponse::new(embedding, self.model_name.clone()))
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let texts: Vec<String> = requests.into_iter().map(|r| r.text).collect();
        Ok(self
            .run(texts)
            .await?
            .into_iter()
            .map(|embedding| EmbeddingResponse::new(embedding, self.model_name.clone()))
            .collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}
