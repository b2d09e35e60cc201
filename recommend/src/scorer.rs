//! Similarity scoring against the reference centroid.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use paperrec_embeddings::{CachedProvider, Embedding, EmbeddingProvider, centroid, cosine_similarity};
use tracing::debug;

use crate::document::{Document, ScoredCandidate};
use crate::error::{RecommendError, Result};

/// Embed `documents` through the cache, in input order.
pub async fn embed_documents<P: EmbeddingProvider>(
    embeddings: &CachedProvider<P>,
    documents: &[Document],
) -> Result<Vec<Embedding>> {
    let items: Vec<(&str, &str)> = documents
        .iter()
        .map(|d| (d.identifier.as_str(), d.text.as_str()))
        .collect();
    Ok(embeddings.get_or_compute_batch(&items).await?)
}

/// Embed the reference set and return its centroid.
pub async fn reference_centroid<P: EmbeddingProvider>(
    embeddings: &CachedProvider<P>,
    references: &[Document],
) -> Result<Embedding> {
    if references.is_empty() {
        return Err(RecommendError::InvalidInput(
            "reference set is empty".to_string(),
        ));
    }
    let vectors = embed_documents(embeddings, references).await?;
    Ok(centroid(&vectors)?)
}

/// Score every candidate against `centroid`.
///
/// The output has one entry per candidate, in input order.
pub async fn rank_all<P: EmbeddingProvider>(
    embeddings: &CachedProvider<P>,
    centroid: &[f32],
    candidates: Vec<Document>,
) -> Result<Vec<ScoredCandidate>> {
    let vectors = embed_documents(embeddings, &candidates).await?;
    let scored = score_embedded(centroid, candidates, &vectors)?;
    debug!("Scored {} candidates", scored.len());
    Ok(scored)
}

/// Pair already-embedded candidates with their cosine similarity to
/// `centroid`.
pub fn score_embedded(
    centroid: &[f32],
    candidates: Vec<Document>,
    vectors: &[Embedding],
) -> Result<Vec<ScoredCandidate>> {
    if candidates.len() != vectors.len() {
        return Err(RecommendError::InvalidInput(format!(
            "{} candidates but {} embeddings",
            candidates.len(),
            vectors.len()
        )));
    }

    candidates
        .into_iter()
        .zip(vectors)
        .map(|(document, vector)| {
            let score = cosine_similarity(centroid, vector)?;
            Ok(ScoredCandidate::new(document, score))
        })
        .collect()
}

/// Sort by descending score. Ties keep their input order.
pub fn sort_by_score(scored: &mut [ScoredCandidate]) {
    scored.sort_by_key(|c| Reverse(OrderedFloat(c.score)));
}
