//! Persistent embedding cache keyed by document identifier.
//!
//! Entries are keyed by identifier only, never by a hash of the text: if a
//! document's text changes but its identifier does not, the old embedding is
//! served until the entry is removed.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Identifier of the document that was embedded.
    pub identifier: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Model used to generate the embedding, when known.
    #[serde(default)]
    pub model: Option<String>,

    /// When the entry was created (seconds since the epoch).
    pub created_at: u64,
}

impl CacheEntry {
    fn new(identifier: String, embedding: Embedding, model: Option<String>) -> Self {
        Self {
            identifier,
            embedding,
            model,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// Cache for embeddings to avoid recomputing them across runs.
pub struct EmbeddingCache {
    /// In-memory cache.
    cache: RwLock<HashMap<String, CacheEntry>>,

    /// Path for persistent cache storage.
    cache_path: Option<PathBuf>,

    /// Maximum cache size (unbounded when `None`).
    max_entries: Option<usize>,

    /// Set by every mutation, cleared by a successful flush.
    dirty: AtomicBool,

    /// Serializes writers of the backing file.
    write_lock: Mutex<()>,
}

impl EmbeddingCache {
    /// Create a cache that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            cache_path: None,
            max_entries: None,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a cache backed by `path`.
    ///
    /// Never fails: a missing file starts an empty cache, and an unreadable
    /// or corrupt file is logged and replaced on the next flush.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut cache = Self::in_memory();

        match Self::load(&path).await {
            Ok(Some(entries)) => {
                let map: HashMap<String, CacheEntry> = entries
                    .into_iter()
                    .map(|entry| (entry.identifier.clone(), entry))
                    .collect();
                info!("Loaded {} cached embeddings from {}", map.len(), path.display());
                cache.cache = RwLock::new(map);
            }
            Ok(None) => debug!("No embedding cache at {}, starting empty", path.display()),
            Err(e) => warn!(
                "Could not load embedding cache from {}: {e}; starting empty",
                path.display()
            ),
        }

        cache.cache_path = Some(path);
        cache
    }

    /// Bound the number of entries; the oldest entry is evicted on overflow.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Location of the backing file, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, identifier: &str) -> Option<Embedding> {
        let cache = self.cache.read().await;
        cache.get(identifier).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache. Call [`EmbeddingCache::flush`] to
    /// persist it.
    pub async fn put(&self, identifier: impl Into<String>, embedding: Embedding) {
        self.insert(CacheEntry::new(identifier.into(), embedding, None))
            .await;
    }

    /// Put an embedding in the cache, recording the model that produced it.
    pub async fn put_from_model(
        &self,
        identifier: impl Into<String>,
        embedding: Embedding,
        model: impl Into<String>,
    ) {
        self.insert(CacheEntry::new(
            identifier.into(),
            embedding,
            Some(model.into()),
        ))
        .await;
    }

    async fn insert(&self, entry: CacheEntry) {
        let mut cache = self.cache.write().await;

        if let Some(max_entries) = self.max_entries
            && !cache.contains_key(&entry.identifier)
            && cache.len() >= max_entries
            && let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.created_at)
                .map(|(k, _)| k.clone())
        {
            cache.remove(&oldest_key);
        }

        debug!("Cached embedding for {}", entry.identifier);
        cache.insert(entry.identifier.clone(), entry);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Check if an embedding is cached.
    pub async fn contains(&self, identifier: &str) -> bool {
        self.cache.read().await.contains_key(identifier)
    }

    /// Remove an embedding from the cache.
    pub async fn remove(&self, identifier: &str) -> Option<Embedding> {
        let removed = self.cache.write().await.remove(identifier);
        if removed.is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed.map(|e| e.embedding)
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
        self.dirty.store(true, Ordering::SeqCst);
        info!("Cleared embedding cache");
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache holds no embeddings.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        CacheStats {
            entries: cache.len(),
            max_entries: self.max_entries,
            models: cache
                .values()
                .filter_map(|e| e.model.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }

    /// Write the cache to its backing file.
    ///
    /// No-op for in-memory caches and when nothing changed since the last
    /// successful flush. The file is written to a temporary sibling and
    /// renamed into place, so an interrupted flush leaves the previous
    /// contents intact.
    pub async fn flush(&self) -> Result<()> {
        let Some(ref path) = self.cache_path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.save(path).await;
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let content = {
            let cache = self.cache.read().await;
            let mut entries: Vec<&CacheEntry> = cache.values().collect();
            entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            serde_json::to_string(&entries)?
        };

        let persist_err = |e: std::io::Error| {
            EmbeddingError::CachePersistence(format!("{}: {e}", path.display()))
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(persist_err)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, content).await.map_err(persist_err)?;
        fs::rename(&tmp, path).await.map_err(persist_err)?;
        debug!("Saved embedding cache to {}", path.display());
        Ok(())
    }

    async fn load(path: &Path) -> Result<Option<Vec<CacheEntry>>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EmbeddingError::CachePersistence(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        };

        let entries: Vec<CacheEntry> = serde_json::from_str(&content)
            .map_err(|e| EmbeddingError::CachePersistence(format!("{}: {e}", path.display())))?;
        Ok(Some(entries))
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: Option<usize>,

    /// Models with cached embeddings.
    pub models: Vec<String>,
}

/// When [`CachedProvider`] persists newly computed embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush after every computed embedding.
    #[default]
    EveryPut,
    /// Flush once at the end of each batch.
    EndOfBatch,
}

/// A wrapper that provides cached embedding generation.
///
/// [`CachedProvider::get_or_compute`] and
/// [`CachedProvider::get_or_compute_batch`] are the only way the rest of the
/// system obtains embeddings. Every vector handed out, cached or fresh, is
/// checked against the provider's dimension.
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
    flush_policy: FlushPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self {
            provider,
            cache,
            flush_policy: FlushPolicy::default(),
            batch_size: 32,
            concurrency: 4,
        }
    }

    /// Choose when new embeddings are flushed.
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Number of texts sent to the provider per batch call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Number of provider batch calls in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Get the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.provider.default_dimension();
        if expected != 0 && embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.cache.flush().await {
            warn!("Failed to save embedding cache: {e}");
        }
    }

    /// Return the cached embedding for `identifier`, or embed `text`, cache
    /// and flush the result.
    pub async fn get_or_compute(&self, identifier: &str, text: &str) -> Result<Embedding> {
        if let Some(embedding) = self.cache.get(identifier).await {
            debug!("Cache hit for {identifier}");
            self.check_dimension(&embedding)?;
            return Ok(embedding);
        }

        debug!("Cache miss for {identifier}");
        let response = self.provider.embed(EmbeddingRequest::new(text)).await?;
        self.check_dimension(&response.embedding)?;
        self.cache
            .put_from_model(identifier, response.embedding.clone(), response.model)
            .await;
        self.persist().await;

        Ok(response.embedding)
    }

    /// Resolve embeddings for `(identifier, text)` pairs, in input order.
    ///
    /// Misses are embedded in chunks of `batch_size`, with up to
    /// `concurrency` chunks in flight. An identifier repeated in `items` is
    /// embedded once.
    pub async fn get_or_compute_batch(&self, items: &[(&str, &str)]) -> Result<Vec<Embedding>> {
        let mut results: Vec<Option<Embedding>> = vec![None; items.len()];
        let mut pending: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut misses: Vec<usize> = Vec::new();

        for (i, &(identifier, _)) in items.iter().enumerate() {
            if let Some(slots) = pending.get_mut(identifier) {
                slots.push(i);
                continue;
            }
            match self.cache.get(identifier).await {
                Some(embedding) => {
                    self.check_dimension(&embedding)?;
                    results[i] = Some(embedding);
                }
                None => {
                    pending.insert(identifier, vec![i]);
                    misses.push(i);
                }
            }
        }

        debug!(
            "Embedding batch: {} items, {} cache misses",
            items.len(),
            misses.len()
        );

        let computed = stream::iter(misses.chunks(self.batch_size).map(|chunk| async move {
            let requests = chunk
                .iter()
                .map(|&i| EmbeddingRequest::new(items[i].1))
                .collect();
            let responses = self.provider.embed_batch(requests).await?;
            if responses.len() != chunk.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    responses.len()
                )));
            }
            self.store_chunk(chunk, items, &responses).await?;
            Ok::<_, EmbeddingError>((chunk, responses))
        }))
        .buffered(self.concurrency)
        .try_collect::<Vec<_>>()
        .await;

        if self.flush_policy == FlushPolicy::EndOfBatch {
            self.persist().await;
        }

        for (chunk, responses) in computed? {
            for (&i, response) in chunk.iter().zip(responses) {
                let slots = pending.get(items[i].0).map(Vec::as_slice).unwrap_or(&[]);
                for &slot in slots {
                    results[slot] = Some(response.embedding.clone());
                }
            }
        }

        results
            .into_iter()
            .map(|embedding| {
                embedding.ok_or_else(|| {
                    EmbeddingError::InvalidResponse("missing embedding in batch".to_string())
                })
            })
            .collect()
    }

    async fn store_chunk(
        &self,
        chunk: &[usize],
        items: &[(&str, &str)],
        responses: &[EmbeddingResponse],
    ) -> Result<()> {
        for (&i, response) in chunk.iter().zip(responses) {
            self.check_dimension(&response.embedding)?;
            self.cache
                .put_from_model(items[i].0, response.embedding.clone(), response.model.clone())
                .await;
            if self.flush_policy == FlushPolicy::EveryPut {
                self.persist().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingProvider;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Hashing provider that counts how many texts it embedded.
    struct CountingProvider {
        inner: HashingProvider,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(dimension: usize) -> Self {
            Self {
                inner: HashingProvider::new(dimension),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            self.inner.default_model()
        }

        fn default_dimension(&self) -> usize {
            self.inner.default_dimension()
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(request).await
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::in_memory();
        let embedding = vec![1.0, 2.0, 3.0];

        cache.put("paper.pdf", embedding.clone()).await;

        assert_eq!(cache.get("paper.pdf").await, Some(embedding));
        assert!(cache.contains("paper.pdf").await);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = EmbeddingCache::in_memory();
        assert!(cache.get("not cached").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = EmbeddingCache::in_memory().with_max_entries(2);

        cache.put("a", vec![1.0]).await;
        cache.put("b", vec![2.0]).await;
        cache.put("c", vec![3.0]).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert!(cache.contains("c").await);
    }

    #[tokio::test]
    async fn test_round_trip_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("embeddings_cache.json");

        let cache = EmbeddingCache::open(&path).await;
        cache.put("x", vec![0.25, -0.5]).await;
        cache.flush().await.unwrap();

        let reopened = EmbeddingCache::open(&path).await;
        assert_eq!(reopened.get("x").await, Some(vec![0.25, -0.5]));
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("embeddings_cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = EmbeddingCache::open(&path).await;
        assert!(cache.is_empty().await);

        cache.put("y", vec![1.0]).await;
        cache.flush().await.unwrap();

        let reopened = EmbeddingCache::open(&path).await;
        assert_eq!(reopened.get("y").await, Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_flush_failure_reports_persistence_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let cache = EmbeddingCache::open(blocker.join("cache.json")).await;
        cache.put("z", vec![1.0]).await;
        assert!(matches!(
            cache.flush().await,
            Err(EmbeddingError::CachePersistence(_))
        ));
    }

    #[tokio::test]
    async fn test_get_or_compute_uses_cache() {
        let cached = CachedProvider::new(CountingProvider::new(16), EmbeddingCache::in_memory());

        let first = cached.get_or_compute("a.pdf", "sparse transformers").await.unwrap();
        let second = cached.get_or_compute("a.pdf", "sparse transformers").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_identifier_keyed_cache_serves_stale_embedding() {
        let cached = CachedProvider::new(CountingProvider::new(16), EmbeddingCache::in_memory());

        let original = cached.get_or_compute("a.pdf", "protein folding").await.unwrap();
        let edited = cached.get_or_compute("a.pdf", "galaxy formation").await.unwrap();

        assert_eq!(original, edited);
        assert_eq!(cached.provider().calls(), 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_persists_each_miss() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");

        let cached = CachedProvider::new(HashingProvider::new(8), EmbeddingCache::open(&path).await);
        let embedding = cached.get_or_compute("doc", "some words").await.unwrap();

        let reopened = EmbeddingCache::open(&path).await;
        assert_eq!(reopened.get("doc").await, Some(embedding));
    }

    #[tokio::test]
    async fn test_save_failure_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let cache = EmbeddingCache::open(blocker.join("cache.json")).await;
        let cached = CachedProvider::new(HashingProvider::new(8), cache);

        assert!(cached.get_or_compute("doc", "text").await.is_ok());
    }

    #[tokio::test]
    async fn test_cached_dimension_mismatch_is_rejected() {
        let cache = EmbeddingCache::in_memory();
        cache.put("old", vec![1.0, 0.0]).await;
        let cached = CachedProvider::new(HashingProvider::new(8), cache);

        let err = cached.get_or_compute("old", "text").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_skips_hits() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");

        let hashing = HashingProvider::new(16);
        let cache = EmbeddingCache::open(&path).await;
        cache.put("b", hashing.embed_text("beta")).await;

        let cached = CachedProvider::new(CountingProvider::new(16), cache)
            .with_batch_size(2)
            .with_concurrency(3)
            .with_flush_policy(FlushPolicy::EndOfBatch);

        let items = [
            ("a", "alpha"),
            ("b", "beta"),
            ("c", "gamma"),
            ("a", "alpha"),
            ("d", "delta"),
        ];
        let embeddings = cached.get_or_compute_batch(&items).await.unwrap();

        assert_eq!(embeddings.len(), items.len());
        for ((_, text), embedding) in items.iter().zip(&embeddings) {
            assert_eq!(embedding, &hashing.embed_text(text));
        }
        assert_eq!(cached.provider().calls(), 3);

        let reopened = EmbeddingCache::open(&path).await;
        assert_eq!(reopened.len().await, 4);
    }
}
