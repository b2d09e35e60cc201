//! OpenAI embeddings API provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Environment variable holding the API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Default model.
    default_model: String,

    /// Requested output dimensions, when the model supports shortening.
    dimensions: Option<usize>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider, picking the key up from the environment
    /// when present.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var(OPENAI_API_KEY_ENV).ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            default_model: "text-embedding-3-small".to_string(),
            dimensions: None,
        }
    }

    /// Create a provider that requires the API key to be set.
    pub fn from_env() -> Result<Self> {
        let provider = Self::new();
        if provider.api_key.is_none() {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "{OPENAI_API_KEY_ENV} environment variable not set"
            )));
        }
        Ok(provider)
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Ask the API for shortened vectors of `dimensions` entries.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Native dimension of a known OpenAI embedding model.
    pub fn model_dimension(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }

    async fn post_embeddings(
        &self,
        input: serde_json::Value,
        model: &str,
        dimensions: Option<usize>,
    ) -> Result<OpenAIEmbeddingResponse> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable(format!("{OPENAI_API_KEY_ENV} not set"))
        })?;

        let mut body = serde_json::json!({
            "input": input,
            "model": model
        });

        if let Some(dims) = dimensions.or(self.dimensions) {
            body["dimensions"] = serde_json::json!(dims);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "API error ({status}): {error_text}"
            )));
        }

        Ok(response.json().await?)
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn default_dimension(&self) -> usize {
        self.dimensions
            .unwrap_or_else(|| Self::model_dimension(&self.default_model))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.default_model.clone());

        debug!("Generating embedding with model: {model}");

        let result = self
            .post_embeddings(serde_json::json!(request.text), &model, request.dimensions)
            .await?;

        let tokens_used = result.usage.as_ref().map(|u| u.total_tokens);
        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding in response".to_string()))?
            .embedding;

        let mut response = EmbeddingResponse::new(embedding, result.model);
        response.tokens_used = tokens_used;
        Ok(response)
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };

        let model = first
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let dimensions = first.dimensions;
        let expected = requests.len();
        let texts: Vec<String> = requests.into_iter().map(|r| r.text).collect();

        debug!(
            "Generating batch embeddings for {expected} texts with model: {model}"
        );

        let mut result = self
            .post_embeddings(serde_json::json!(texts), &model, dimensions)
            .await?;

        if result.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                result.data.len()
            )));
        }

        result.data.sort_by_key(|item| item.index);
        let responses: Vec<EmbeddingResponse> = result
            .data
            .into_iter()
            .map(|item| EmbeddingResponse::new(item.embedding, result.model.clone()))
            .collect();

        info!("Generated {} batch embeddings", responses.len());

        Ok(responses)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    model: String,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}
