//! Vector math over embeddings: cosine similarity and centroids.

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// A zero-norm input yields exactly 0.0 rather than NaN, so scores always
/// sort cleanly.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (magnitude_a * magnitude_b))
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Euclidean norm of an embedding.
pub fn magnitude(embedding: &[f32]) -> f32 {
    embedding.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize an embedding to unit length. Zero vectors are left untouched.
pub fn normalize(embedding: &mut [f32]) {
    let magnitude = magnitude(embedding);
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Compute the elementwise mean of a non-empty set of embeddings.
///
/// Accumulates in `f64` so the result does not depend on input order beyond
/// rounding of the final cast.
pub fn centroid(embeddings: &[Embedding]) -> Result<Embedding> {
    let Some(first) = embeddings.first() else {
        return Err(EmbeddingError::InvalidInput(
            "cannot compute a centroid of an empty embedding set".to_string(),
        ));
    };

    let dim = first.len();
    for e in embeddings {
        if e.len() != dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dim,
                actual: e.len(),
            });
        }
    }

    let mut sums = vec![0.0f64; dim];
    for embedding in embeddings {
        for (sum, val) in sums.iter_mut().zip(embedding) {
            *sum += f64::from(*val);
        }
    }

    let n = embeddings.len() as f64;
    Ok(sums.into_iter().map(|sum| (sum / n) as f32).collect())
}
