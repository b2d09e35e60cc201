//! Documents and scored candidates.

use serde::{Deserialize, Serialize};

/// A document handed to the recommender by a document source.
///
/// `identifier` is the stable key used for caching; `text` is never modified
/// after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable, unique key (a file path for directory sources).
    pub identifier: String,

    /// Extracted plain text.
    pub text: String,

    /// Display metadata owned by the source (title, filename, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
            metadata: None,
        }
    }

    /// Attach display metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Title from the metadata, falling back to the identifier.
    pub fn title(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&self.identifier)
    }
}

/// A candidate document paired with its similarity to the reference centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// The candidate.
    pub document: Document,

    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

impl ScoredCandidate {
    /// Pair a document with its score.
    pub fn new(document: Document, score: f32) -> Self {
        Self { document, score }
    }

    /// Identifier of the underlying document.
    pub fn identifier(&self) -> &str {
        &self.document.identifier
    }
}
