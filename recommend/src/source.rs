//! Where reference and candidate documents come from.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::Document;
use crate::error::{RecommendError, Result};

/// Longest title taken from a document's first line.
const MAX_TITLE_CHARS: usize = 200;

/// Supplies the documents a recommendation run works on.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents the user has marked as interesting.
    async fn list_reference_documents(&self) -> Result<Vec<Document>>;

    /// Documents to rank. Must not include the references.
    async fn list_candidate_documents(&self) -> Result<Vec<Document>>;
}

/// A source over documents already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    references: Vec<Document>,
    candidates: Vec<Document>,
}

impl InMemorySource {
    pub fn new(references: Vec<Document>, candidates: Vec<Document>) -> Self {
        Self {
            references,
            candidates,
        }
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn list_reference_documents(&self) -> Result<Vec<Document>> {
        Ok(self.references.clone())
    }

    async fn list_candidate_documents(&self) -> Result<Vec<Document>> {
        Ok(self.candidates.clone())
    }
}

/// Reads plain-text documents from a reference directory and a candidate
/// directory.
///
/// Identifiers are file paths. Files found under both directories count as
/// references only. Unreadable and empty files are skipped.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    reference_dir: PathBuf,
    candidate_dir: PathBuf,
    extensions: Vec<String>,
    recursive: bool,
    max_chars: Option<usize>,
}

impl DirectorySource {
    /// Create a source reading `.txt` and `.md` files recursively.
    pub fn new(reference_dir: impl Into<PathBuf>, candidate_dir: impl Into<PathBuf>) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            candidate_dir: candidate_dir.into(),
            extensions: vec!["txt".to_string(), "md".to_string()],
            recursive: true,
            max_chars: None,
        }
    }

    /// Only read files with these extensions (case-insensitive, no dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Whether to descend into subdirectories.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Truncate document text to this many characters.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    fn collect_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(RecommendError::Source(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        let walker = if self.recursive {
            WalkDir::new(dir)
        } else {
            WalkDir::new(dir).max_depth(1)
        };

        let mut files = Vec::new();
        for entry in walker.into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(ext) = path.extension().and_then(|e| e.to_str())
                && self.extensions.contains(&ext.to_lowercase())
            {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    async fn read_documents(&self, files: Vec<PathBuf>) -> Vec<Document> {
        let mut documents = Vec::with_capacity(files.len());
        for path in files {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };
            if text.trim().is_empty() {
                debug!("Skipping {}: no text", path.display());
                continue;
            }
            documents.push(self.to_document(&path, text));
        }
        documents
    }

    fn to_document(&self, path: &Path, text: String) -> Document {
        let text = match self.max_chars {
            Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
            _ => text,
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| line.trim_start_matches('#').trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.chars().take(MAX_TITLE_CHARS).collect::<String>())
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        Document::new(path.to_string_lossy(), text).with_metadata(serde_json::json!({
            "filename": filename,
            "title": title,
        }))
    }

    fn reference_paths(&self) -> Result<HashSet<PathBuf>> {
        Ok(self
            .collect_files(&self.reference_dir)?
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .collect())
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn list_reference_documents(&self) -> Result<Vec<Document>> {
        let files = self.collect_files(&self.reference_dir)?;
        let documents = self.read_documents(files).await;
        info!(
            "Found {} reference documents in {}",
            documents.len(),
            self.reference_dir.display()
        );
        Ok(documents)
    }

    async fn list_candidate_documents(&self) -> Result<Vec<Document>> {
        let references = self.reference_paths()?;
        let files: Vec<PathBuf> = self
            .collect_files(&self.candidate_dir)?
            .into_iter()
            .filter(|p| {
                let canonical = p.canonicalize().unwrap_or_else(|_| p.clone());
                !references.contains(&canonical)
            })
            .collect();
        let documents = self.read_documents(files).await;
        info!(
            "Found {} candidate documents in {}",
            documents.len(),
            self.candidate_dir.display()
        );
        Ok(documents)
    }
}
