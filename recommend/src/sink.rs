//! Post-processing applied to a finished recommendation batch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::ScoredCandidate;
use crate::error::{RecommendError, Result};

/// Download managers name repeated copies `paper (1).pdf`, `paper (2).pdf`.
pub const DEFAULT_DUPLICATE_PATTERN: &str = r"\([0-9]+\)";

/// Outcome of applying a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    /// Recommendations the sink acted on.
    pub applied: usize,
    /// Recommendations the sink tried and failed to act on.
    pub failed: usize,
}

/// Consumes a recommendation batch.
#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn apply(&self, recommendations: &[ScoredCandidate]) -> Result<SinkReport>;
}

/// Moves recommended files whose names mark them as duplicate downloads
/// into a separate directory.
///
/// Only identifiers that are paths to existing files are considered. Name
/// clashes in the target are resolved as `{stem}_moved{n}{ext}`.
#[derive(Debug, Clone)]
pub struct DuplicateRelocator {
    target_dir: PathBuf,
    pattern: Regex,
}

impl DuplicateRelocator {
    pub fn new(target_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_pattern(target_dir, DEFAULT_DUPLICATE_PATTERN)
    }

    /// Use a custom file-name pattern to detect duplicates.
    pub fn with_pattern(target_dir: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| RecommendError::Config(format!("invalid duplicate pattern: {e}")))?;
        Ok(Self {
            target_dir: target_dir.into(),
            pattern,
        })
    }

    /// Whether the file name of `path` marks it as a duplicate.
    pub fn is_duplicate(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.pattern.is_match(n))
    }

    /// First free destination for `file_name` in the target directory.
    fn destination(&self, file_name: &str) -> PathBuf {
        let candidate = self.target_dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let name = Path::new(file_name);
        let stem = name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = name
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut n = 1;
        loop {
            let candidate = self.target_dir.join(format!("{stem}_moved{n}{ext}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    async fn relocate(&self, source: &Path) -> std::io::Result<PathBuf> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination = self.destination(&file_name);

        if tokio::fs::rename(source, &destination).await.is_err() {
            // Cross-device moves need a copy.
            tokio::fs::copy(source, &destination).await?;
            tokio::fs::remove_file(source).await?;
        }
        Ok(destination)
    }
}

#[async_trait]
impl RecommendationSink for DuplicateRelocator {
    async fn apply(&self, recommendations: &[ScoredCandidate]) -> Result<SinkReport> {
        let duplicates: Vec<&Path> = recommendations
            .iter()
            .map(|c| Path::new(c.identifier()))
            .filter(|p| self.is_duplicate(p) && p.is_file())
            .collect();

        let mut report = SinkReport::default();
        if duplicates.is_empty() {
            return Ok(report);
        }

        tokio::fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| {
                RecommendError::Sink(format!("{}: {e}", self.target_dir.display()))
            })?;

        for source in duplicates {
            match self.relocate(source).await {
                Ok(destination) => {
                    info!("Moved {} to {}", source.display(), destination.display());
                    report.applied += 1;
                }
                Err(e) => {
                    warn!("Failed to move {}: {e}", source.display());
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn scored(path: &Path) -> ScoredCandidate {
        ScoredCandidate::new(Document::new(path.to_string_lossy(), "text"), 0.5)
    }

    #[test]
    fn test_duplicate_pattern() {
        let relocator = DuplicateRelocator::new("/tmp/dupes").unwrap();
        assert!(relocator.is_duplicate(Path::new("/papers/attention (1).pdf")));
        assert!(relocator.is_duplicate(Path::new("bert(12).txt")));
        assert!(!relocator.is_duplicate(Path::new("/papers/attention.pdf")));
        assert!(!relocator.is_duplicate(Path::new("notes (draft).txt")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = DuplicateRelocator::with_pattern("/tmp", "(").unwrap_err();
        assert!(matches!(err, RecommendError::Config(_)));
    }

    #[tokio::test]
    async fn test_moves_only_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path().join("library");
        let target = temp_dir.path().join("duplicates");
        fs::create_dir_all(&library).unwrap();
        let dupe = library.join("paper (1).txt");
        let original = library.join("paper.txt");
        fs::write(&dupe, "copy").unwrap();
        fs::write(&original, "original").unwrap();

        let relocator = DuplicateRelocator::new(&target).unwrap();
        let report = relocator
            .apply(&[scored(&original), scored(&dupe)])
            .await
            .unwrap();

        assert_eq!(report, SinkReport { applied: 1, failed: 0 });
        assert!(original.exists());
        assert!(!dupe.exists());
        assert!(target.join("paper (1).txt").exists());
    }

    #[tokio::test]
    async fn test_name_clash_gets_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("duplicates");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("paper (1).txt"), "already here").unwrap();
        let dupe = temp_dir.path().join("paper (1).txt");
        fs::write(&dupe, "copy").unwrap();

        let relocator = DuplicateRelocator::new(&target).unwrap();
        relocator.apply(&[scored(&dupe)]).await.unwrap();

        assert!(target.join("paper (1)_moved1.txt").exists());
    }

    #[tokio::test]
    async fn test_no_duplicates_leaves_target_uncreated() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("duplicates");
        let relocator = DuplicateRelocator::new(&target).unwrap();

        let report = relocator
            .apply(&[scored(&temp_dir.path().join("missing (2).txt"))])
            .await
            .unwrap();

        assert_eq!(report, SinkReport::default());
        assert!(!target.exists());
    }
}
