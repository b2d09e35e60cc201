//! End-to-end recommendation runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use paperrec_embeddings::{EmbeddingRequest, EmbeddingResponse};
use paperrec_recommend::{
    CachedProvider, DirectorySource, Document, EmbeddingCache, EmbeddingProvider,
    InMemorySource, RecommendConfig, RecommendError, RecommendRequest, Recommender,
    SamplingConfig, ScoredCandidate, TopK,
};
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempfile::TempDir;

/// Parses the embedding out of the text ("1,0" -> [1.0, 0.0]) and counts
/// calls.
#[derive(Default)]
struct LiteralProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for LiteralProvider {
    fn name(&self) -> &str {
        "literal"
    }

    fn default_model(&self) -> &str {
        "literal"
    }

    fn default_dimension(&self) -> usize {
        2
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> paperrec_embeddings::Result<EmbeddingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let embedding = request
            .text
            .split(',')
            .map(|v| v.trim().parse::<f32>().unwrap_or(0.0))
            .collect();
        Ok(EmbeddingResponse::new(embedding, "literal"))
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn recommender(provider: Arc<LiteralProvider>) -> Recommender<Arc<LiteralProvider>> {
    Recommender::new(CachedProvider::new(provider, EmbeddingCache::in_memory()))
}

fn ids(batch: &[ScoredCandidate]) -> Vec<&str> {
    batch.iter().map(ScoredCandidate::identifier).collect()
}

/// Candidates whose similarity to [1, 1] falls as `i` grows.
fn graded_candidates(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| Document::new(format!("paper-{i:02}"), format!("{},{}", n, n + i * 3)))
        .collect()
}

#[tokio::test]
async fn test_basic_recommendation() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(
        vec![Document::new("a", "1,0"), Document::new("b", "0,1")],
        vec![Document::new("c", "1,0"), Document::new("d", "0,0")],
    )
    .with_top_k(TopK::Count(2))
    .with_surprise(0.0);

    let batch = recommender.recommend(request).await.unwrap();

    assert_eq!(ids(&batch), vec!["c", "d"]);
    assert!((batch[0].score - 0.70710677).abs() < 1e-5);
    assert_eq!(batch[1].score, 0.0);
}

#[tokio::test]
async fn test_percent_batch_size() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(vec![Document::new("r", "1,1")], graded_candidates(50))
        .with_top_k(TopK::Percent(0.2))
        .with_surprise(0.2);

    let mut rng = StdRng::seed_from_u64(11);
    let batch = recommender
        .recommend_with_rng(request, &mut rng)
        .await
        .unwrap();

    assert_eq!(batch.len(), 10);
    assert_eq!(batch[0].identifier(), "paper-00");
}

#[tokio::test]
async fn test_small_library_gets_minimum_batch() {
    let recommender = recommender(Arc::default());
    let request =
        RecommendRequest::new(vec![Document::new("r", "1,1")], graded_candidates(8)).with_surprise(0.0);

    let batch = recommender.recommend(request).await.unwrap();

    assert_eq!(
        ids(&batch),
        vec!["paper-00", "paper-01", "paper-02", "paper-03", "paper-04"]
    );
}

#[tokio::test]
async fn test_empty_references_rejected() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(Vec::new(), graded_candidates(3));

    let err = recommender.recommend(request).await.unwrap_err();

    assert!(matches!(err, RecommendError::InvalidInput(_)));
}

#[tokio::test]
async fn test_out_of_range_surprise_rejected() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(vec![Document::new("r", "1,1")], graded_candidates(3))
        .with_surprise(2.0);

    let err = recommender.recommend(request).await.unwrap_err();

    assert!(matches!(err, RecommendError::InvalidInput(_)));
}

#[tokio::test]
async fn test_empty_candidates_yield_empty_batch() {
    let provider = Arc::new(LiteralProvider::default());
    let recommender = recommender(Arc::clone(&provider));
    let request = RecommendRequest::new(vec![Document::new("r", "1,1")], Vec::new());

    let batch = recommender.recommend(request).await.unwrap();

    assert!(batch.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_references_reported_without_candidates() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(
        vec![Document::new("a", "1,0"), Document::new("b", "1,0,0")],
        Vec::new(),
    );

    let err = recommender.recommend(request).await.unwrap_err();

    assert!(matches!(err, RecommendError::InvalidInput(_)));
}

#[tokio::test]
async fn test_mixed_dimensions_rejected() {
    let recommender = recommender(Arc::default());
    let request = RecommendRequest::new(
        vec![Document::new("r", "1,1")],
        vec![Document::new("c", "1,0,0")],
    );

    let err = recommender.recommend(request).await.unwrap_err();

    assert!(matches!(err, RecommendError::InvalidInput(_)));
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let cache_path = temp_dir.path().join("cache.json");
    let references = vec![Document::new("r", "1,1")];
    let candidates = graded_candidates(6);

    let first = Arc::new(LiteralProvider::default());
    let recommender = Recommender::new(CachedProvider::new(
        Arc::clone(&first),
        EmbeddingCache::open(&cache_path).await,
    ));
    let request = RecommendRequest::new(references.clone(), candidates.clone()).with_surprise(0.0);
    let before = recommender.recommend(request).await.unwrap();
    assert_eq!(first.calls.load(Ordering::SeqCst), 7);

    let second = Arc::new(LiteralProvider::default());
    let recommender = Recommender::new(CachedProvider::new(
        Arc::clone(&second),
        EmbeddingCache::open(&cache_path).await,
    ));
    let request = RecommendRequest::new(references, candidates).with_surprise(0.0);
    let after = recommender.recommend(request).await.unwrap();

    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_recommend_from_source_with_subsample() {
    let sampling = SamplingConfig {
        top_k: Some(3),
        surprise: 0.0,
        subsample: Some(10),
        seed: Some(5),
        ..SamplingConfig::default()
    };
    let recommender = recommender(Arc::default()).with_sampling(sampling);
    let source = InMemorySource::new(vec![Document::new("r", "1,1")], graded_candidates(40));

    let report = recommender.recommend_from_source(&source).await.unwrap();

    assert_eq!(report.reference_count, 1);
    assert_eq!(report.candidate_count, 10);
    assert_eq!(report.top_k, 3);
    assert_eq!(report.recommendations.len(), 3);

    let again = recommender.recommend_from_source(&source).await.unwrap();
    assert_eq!(ids(&report.recommendations), ids(&again.recommendations));
}

#[tokio::test]
async fn test_directory_run_with_hashing_provider() {
    let temp_dir = TempDir::new().unwrap();
    let refs = temp_dir.path().join("starred");
    let library = temp_dir.path().join("library");
    std::fs::create_dir_all(&refs).unwrap();
    std::fs::create_dir_all(&library).unwrap();
    std::fs::write(
        refs.join("transformers.txt"),
        "Attention transformers self attention sequence models",
    )
    .unwrap();
    std::fs::write(
        library.join("bert.txt"),
        "BERT transformers attention pretraining sequence models",
    )
    .unwrap();
    std::fs::write(
        library.join("soil.txt"),
        "Soil moisture irrigation crop yield agriculture",
    )
    .unwrap();

    let cache_path = temp_dir.path().join("cache/embeddings.json");
    let mut config = RecommendConfig::new(&cache_path);
    config.sampling.top_k = Some(1);
    config.sampling.surprise = 0.0;

    let recommender = Recommender::from_config(&config).await.unwrap();
    let report = recommender
        .recommend_from_source(&DirectorySource::new(&refs, &library))
        .await
        .unwrap();

    assert_eq!(report.candidate_count, 2);
    assert_eq!(report.recommendations.len(), 1);
    let best = &report.recommendations[0].document;
    assert!(best.identifier.ends_with("bert.txt"));
    assert_eq!(best.metadata.as_ref().unwrap()["filename"], "bert.txt");
    assert!(cache_path.exists());
}
