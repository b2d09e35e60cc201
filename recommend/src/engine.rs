//! Recommendation orchestrator.

use std::sync::Arc;

use paperrec_embeddings::{CachedProvider, EmbeddingCache, EmbeddingProvider};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DEFAULT_SURPRISE, DEFAULT_TOP_K_PERCENT, RecommendConfig, SamplingConfig};
use crate::diversity::DiversitySampler;
use crate::document::{Document, ScoredCandidate};
use crate::error::{RecommendError, Result};
use crate::scorer;
use crate::source::DocumentSource;

/// How large a batch to recommend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopK {
    /// Exactly this many (capped at the candidate count).
    Count(usize),
    /// This fraction of the candidates, floored at the minimum batch size.
    Percent(f64),
}

impl Default for TopK {
    fn default() -> Self {
        TopK::Percent(DEFAULT_TOP_K_PERCENT)
    }
}

/// Resolve the batch size for `candidate_count` candidates.
///
/// Percent sizing yields `max(min_top_k, floor(n * pct))`. The result never
/// exceeds `candidate_count`.
pub fn resolve_top_k(candidate_count: usize, top_k: TopK, min_top_k: usize) -> usize {
    let k = match top_k {
        TopK::Count(k) => k,
        TopK::Percent(pct) => min_top_k.max((candidate_count as f64 * pct).floor() as usize),
    };
    k.min(candidate_count)
}

/// One recommendation run over in-memory documents.
#[derive(Debug, Clone)]
pub struct RecommendRequest {
    pub references: Vec<Document>,
    pub candidates: Vec<Document>,
    pub top_k: TopK,
    pub surprise: f64,
}

impl RecommendRequest {
    pub fn new(references: Vec<Document>, candidates: Vec<Document>) -> Self {
        Self {
            references,
            candidates,
            top_k: TopK::default(),
            surprise: DEFAULT_SURPRISE,
        }
    }

    pub fn with_top_k(mut self, top_k: TopK) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_surprise(mut self, surprise: f64) -> Self {
        self.surprise = surprise;
        self
    }
}

/// Result of [`Recommender::recommend_from_source`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationReport {
    /// The batch, leader first.
    pub recommendations: Vec<ScoredCandidate>,
    /// References the centroid was built from.
    pub reference_count: usize,
    /// Candidates that were scored (after subsampling).
    pub candidate_count: usize,
    /// Resolved batch size.
    pub top_k: usize,
}

/// Ranked candidates awaiting sampling.
struct Ranked {
    sorted: Vec<ScoredCandidate>,
    top_k: usize,
    sampler: DiversitySampler,
}

/// Recommends candidates that resemble a set of reference documents.
///
/// Candidates are scored by cosine similarity to the centroid of the
/// references, sorted, and a batch is drawn with [`DiversitySampler`].
pub struct Recommender<P> {
    embeddings: CachedProvider<P>,
    sampling: SamplingConfig,
}

impl Recommender<Arc<dyn EmbeddingProvider>> {
    /// Build a recommender with the provider, cache and sampling described by
    /// `config`.
    pub async fn from_config(config: &RecommendConfig) -> Result<Self> {
        config.validate()?;
        let embedding = &config.embedding;
        let provider = embedding.create_provider()?;
        info!(
            "Using embedding provider {} ({})",
            provider.name(),
            provider.default_model()
        );

        let cache = if embedding.cache_enabled {
            EmbeddingCache::open(&config.cache_path).await
        } else {
            EmbeddingCache::in_memory()
        };
        let cache = match embedding.cache_max_entries {
            Some(max) => cache.with_max_entries(max),
            None => cache,
        };

        let embeddings = CachedProvider::new(provider, cache)
            .with_flush_policy(embedding.flush)
            .with_batch_size(embedding.batch_size)
            .with_concurrency(embedding.concurrency);

        Ok(Self::new(embeddings).with_sampling(config.sampling.clone()))
    }
}

impl<P> Recommender<P>
where
    P: EmbeddingProvider,
{
    pub fn new(embeddings: CachedProvider<P>) -> Self {
        Self {
            embeddings,
            sampling: SamplingConfig::default(),
        }
    }

    /// Defaults used by [`Recommender::recommend_from_source`].
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn embeddings(&self) -> &CachedProvider<P> {
        &self.embeddings
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    /// Score every candidate and sort by descending similarity.
    pub async fn rank(
        &self,
        references: &[Document],
        candidates: Vec<Document>,
    ) -> Result<Vec<ScoredCandidate>> {
        let centroid = scorer::reference_centroid(&self.embeddings, references).await?;
        self.rank_against(&centroid, candidates).await
    }

    async fn rank_against(
        &self,
        centroid: &[f32],
        candidates: Vec<Document>,
    ) -> Result<Vec<ScoredCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored = scorer::rank_all(&self.embeddings, centroid, candidates).await?;
        scorer::sort_by_score(&mut scored);
        Ok(scored)
    }

    /// Recommend a batch using the configured seed, if any.
    ///
    /// The references are always embedded, so an empty candidate list still
    /// reports provider and dimension errors.
    pub async fn recommend(&self, request: RecommendRequest) -> Result<Vec<ScoredCandidate>> {
        let mut rng = self.rng();
        self.recommend_with_rng(request, &mut rng).await
    }

    /// Recommend a batch, drawing surprises from `rng`.
    pub async fn recommend_with_rng<R>(
        &self,
        request: RecommendRequest,
        rng: &mut R,
    ) -> Result<Vec<ScoredCandidate>>
    where
        R: Rng + ?Sized,
    {
        let ranked = self.prepare(request).await?;
        Ok(ranked.sampler.sample(ranked.sorted, ranked.top_k, rng))
    }

    async fn prepare(&self, request: RecommendRequest) -> Result<Ranked> {
        if request.references.is_empty() {
            return Err(RecommendError::InvalidInput(
                "reference set is empty".to_string(),
            ));
        }
        let sampler = DiversitySampler::new(request.surprise)?;
        let top_k = resolve_top_k(
            request.candidates.len(),
            request.top_k,
            self.sampling.min_top_k,
        );

        info!(
            "Ranking {} candidates against {} references (top_k={top_k}, surprise={})",
            request.candidates.len(),
            request.references.len(),
            request.surprise
        );

        // References are embedded even without candidates so provider and
        // dimension errors surface on every call.
        let centroid = scorer::reference_centroid(&self.embeddings, &request.references).await?;
        let sorted = self.rank_against(&centroid, request.candidates).await?;
        if let Some(best) = sorted.first() {
            debug!("Best match: {} ({:.4})", best.identifier(), best.score);
        }
        Ok(Ranked {
            sorted,
            top_k,
            sampler,
        })
    }

    /// Pull documents from `source` and recommend with the configured
    /// sampling.
    pub async fn recommend_from_source(
        &self,
        source: &dyn DocumentSource,
    ) -> Result<RecommendationReport> {
        let mut rng = self.rng();
        let references = source.list_reference_documents().await?;
        let mut candidates = source.list_candidate_documents().await?;

        if let Some(n) = self.sampling.subsample
            && n < candidates.len()
        {
            info!("Subsampling {n} of {} candidates", candidates.len());
            candidates = candidates.choose_multiple(&mut rng, n).cloned().collect();
        }

        let top_k = match self.sampling.top_k {
            Some(k) => TopK::Count(k),
            None => TopK::Percent(self.sampling.top_k_percent),
        };
        let reference_count = references.len();
        let candidate_count = candidates.len();
        let request = RecommendRequest::new(references, candidates)
            .with_top_k(top_k)
            .with_surprise(self.sampling.surprise);

        let ranked = self.prepare(request).await?;
        let top_k = ranked.top_k;
        let recommendations = ranked.sampler.sample(ranked.sorted, top_k, &mut rng);

        Ok(RecommendationReport {
            recommendations,
            reference_count,
            candidate_count,
            top_k,
        })
    }

    fn rng(&self) -> StdRng {
        match self.sampling.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}
