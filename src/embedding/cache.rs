//! Embedding cache with bounded concurrent fetch and optional persistence
//!
//! Lookups never fail. A miss acquires one of `max_concurrency` permits, calls
//! the provider under a timeout, and stores the result before the permit is
//! released. If the provider errors, times out or returns a vector of the
//! wrong size, the deterministic fallback vector for the text is used instead
//! and cached like any other result.
//!
//! The backing file is JSON holding the IEEE-754 bit pattern of every
//! component, so a reload is bit-exact.

use super::fallback::fallback_vector;
use super::provider::EmbeddingProvider;
use crate::config::RouterConfig;
use crate::embedding_span;
use crate::error::{sanitize_error_message, RouterError, RouterResult};
use crate::index::Metric;
use crate::observability::metrics;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Runtime settings for an [`EmbeddingCache`]
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub metric: Metric,
    /// Outbound provider calls allowed at once
    pub max_concurrency: usize,
    /// Texts per provider batch call
    pub batch_size: usize,
    /// Deadline for one provider call
    pub timeout: Duration,
    /// Backing file; `None` keeps the cache in memory only
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            max_concurrency: 10,
            batch_size: 100,
            timeout: Duration::from_millis(5000),
            path: None,
        }
    }
}

impl From<&RouterConfig> for CacheSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            metric: config.index.metric,
            max_concurrency: config.embedding.max_concurrency,
            batch_size: config.embedding.batch_size,
            timeout: Duration::from_millis(config.embedding.timeout_ms),
            path: config.cache.path.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    metric: Metric,
    dimension: usize,
    entries: Vec<CacheRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    text: String,
    bits: Vec<u32>,
}

/// Memoizes text to vector, shared by every routing task
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    settings: CacheSettings,
    dimension: usize,
    entries: RwLock<HashMap<String, Vec<f32>>>,
    permits: Semaphore,
    dirty: AtomicBool,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: CacheSettings) -> Self {
        let dimension = provider.dimension();
        let permits = Semaphore::new(settings.max_concurrency.max(1));
        Self {
            provider,
            settings,
            dimension,
            entries: RwLock::new(HashMap::new()),
            permits,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.settings.metric
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, text: &str) -> bool {
        self.entries.read().await.contains_key(text)
    }

    /// Cached vector for `text`, without fetching
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.entries.read().await.get(text).cloned()
    }

    /// Vector for `text`, fetching and caching it on a miss
    pub async fn embed_one(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.get(text).await {
            metrics().cache_hits(1);
            return vector;
        }

        // Permit is held until the result is in the map
        let _permit = self.permits.acquire().await.ok();
        if let Some(vector) = self.get(text).await {
            metrics().cache_hits(1);
            return vector;
        }
        metrics().cache_misses(1);

        let fetched = tokio::time::timeout(self.settings.timeout, self.provider.embed(text)).await;
        metrics().provider_call();
        let vector = match fetched {
            Ok(Ok(vector)) if vector.len() == self.dimension => vector,
            Ok(Ok(vector)) => {
                self.log_degraded(&RouterError::dimension_mismatch(self.dimension, vector.len()));
                self.fallback(text)
            }
            Ok(Err(e)) => {
                self.log_degraded(&e);
                self.fallback(text)
            }
            Err(_) => {
                self.log_timeout(1);
                self.fallback(text)
            }
        };

        let vector = self.prepare(vector);
        self.entries
            .write()
            .await
            .insert(text.to_string(), vector.clone());
        self.dirty.store(true, Ordering::Relaxed);
        vector
    }

    /// Vectors for `texts` in input order.
    ///
    /// Misses are de-duplicated and fetched in chunks of `batch_size`; each
    /// chunk holds one permit while it runs, so chunks run in parallel up to
    /// the concurrency cap.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut found: HashMap<String, Vec<f32>> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();
        {
            let entries = self.entries.read().await;
            let mut seen = HashSet::new();
            for text in texts {
                if !seen.insert(text.as_str()) {
                    continue;
                }
                match entries.get(text) {
                    Some(vector) => {
                        found.insert(text.clone(), vector.clone());
                    }
                    None => misses.push(text.clone()),
                }
            }
        }
        metrics().cache_hits(found.len() as u64);

        if !misses.is_empty() {
            let chunks = misses.chunks(self.settings.batch_size.max(1));
            let fetches = chunks.enumerate().map(|(chunk, texts)| {
                self.fetch_chunk(texts.to_vec())
                    .instrument(embedding_span!(chunk, texts = texts.len()))
            });
            for fetched in join_all(fetches).await {
                found.extend(fetched);
            }
        }

        texts
            .iter()
            .map(|text| {
                found
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.prepare(self.fallback(text)))
            })
            .collect()
    }

    async fn fetch_chunk(&self, texts: Vec<String>) -> Vec<(String, Vec<f32>)> {
        let _permit = self.permits.acquire().await.ok();

        // Another task may have filled some of these while we waited
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        {
            let entries = self.entries.read().await;
            for text in texts {
                match entries.get(&text) {
                    Some(vector) => ready.push((text, vector.clone())),
                    None => pending.push(text),
                }
            }
        }
        metrics().cache_hits(ready.len() as u64);
        if pending.is_empty() {
            return ready;
        }
        metrics().cache_misses(pending.len() as u64);

        let fetched =
            tokio::time::timeout(self.settings.timeout, self.provider.embed_batch(&pending)).await;
        metrics().provider_call();
        let vectors: Vec<Vec<f32>> = match fetched {
            Ok(Ok(vectors)) if vectors.len() == pending.len() => vectors
                .into_iter()
                .zip(&pending)
                .map(|(vector, text)| {
                    if vector.len() == self.dimension {
                        vector
                    } else {
                        self.log_degraded(&RouterError::dimension_mismatch(
                            self.dimension,
                            vector.len(),
                        ));
                        self.fallback(text)
                    }
                })
                .collect(),
            Ok(Ok(vectors)) => {
                self.log_degraded(&RouterError::provider_unavailable(
                    self.provider.name(),
                    format!(
                        "batch returned {} vectors for {} texts",
                        vectors.len(),
                        pending.len()
                    ),
                ));
                pending.iter().map(|text| self.fallback(text)).collect()
            }
            Ok(Err(e)) => {
                self.log_degraded(&e);
                pending.iter().map(|text| self.fallback(text)).collect()
            }
            Err(_) => {
                self.log_timeout(pending.len());
                pending.iter().map(|text| self.fallback(text)).collect()
            }
        };

        let fetched: Vec<(String, Vec<f32>)> = pending
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| (text, self.prepare(vector)))
            .collect();
        {
            let mut entries = self.entries.write().await;
            for (text, vector) in &fetched {
                entries.insert(text.clone(), vector.clone());
            }
        }
        self.dirty.store(true, Ordering::Relaxed);

        ready.extend(fetched);
        ready
    }

    fn fallback(&self, text: &str) -> Vec<f32> {
        metrics().fallback_vectors(1);
        fallback_vector(text, self.dimension)
    }

    fn prepare(&self, mut vector: Vec<f32>) -> Vec<f32> {
        self.settings.metric.prepare(&mut vector);
        vector
    }

    fn log_degraded(&self, error: &RouterError) {
        warn!(
            provider = self.provider.name(),
            stage = "embedding",
            error = %error.sanitized(),
            "Embedding provider failed, using fallback vector"
        );
    }

    fn log_timeout(&self, texts: usize) {
        warn!(
            provider = self.provider.name(),
            stage = "embedding",
            timeout_ms = self.settings.timeout.as_millis() as u64,
            texts,
            "Embedding provider timed out, using fallback vectors"
        );
    }

    /// Load entries from the backing file.
    ///
    /// A missing file is not an error. A corrupt file, or one written for a
    /// different metric or dimension, is logged and ignored. Returns the
    /// number of entries loaded.
    pub async fn load_from_disk(&self) -> RouterResult<usize> {
        let Some(path) = &self.settings.path else {
            return Ok(0);
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(RouterError::cache_store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %sanitize_error_message(&e.to_string()),
                    "Embedding cache file is corrupt, starting empty"
                );
                return Ok(0);
            }
        };
        if file.metric != self.settings.metric || file.dimension != self.dimension {
            warn!(
                path = %path.display(),
                file_metric = %file.metric,
                file_dimension = file.dimension,
                metric = %self.settings.metric,
                dimension = self.dimension,
                "Embedding cache file does not match configuration, starting empty"
            );
            return Ok(0);
        }

        let mut entries = self.entries.write().await;
        let mut loaded = 0;
        for record in file.entries {
            if record.bits.len() != self.dimension {
                continue;
            }
            let vector = record.bits.into_iter().map(f32::from_bits).collect();
            entries.insert(record.text, vector);
            loaded += 1;
        }
        info!(path = %path.display(), entries = loaded, "Embedding cache loaded");
        Ok(loaded)
    }

    /// Write every entry to the backing file. Returns the number written.
    pub async fn flush(&self) -> RouterResult<usize> {
        let Some(path) = &self.settings.path else {
            return Ok(0);
        };

        let mut records: Vec<CacheRecord> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(text, vector)| CacheRecord {
                    text: text.clone(),
                    bits: vector.iter().map(|x| x.to_bits()).collect(),
                })
                .collect()
        };
        records.sort_by(|a, b| a.text.cmp(&b.text));
        let count = records.len();

        let file = CacheFile {
            metric: self.settings.metric,
            dimension: self.dimension,
            entries: records,
        };
        let json = serde_json::to_string(&file)
            .map_err(|e| RouterError::cache_store(format!("failed to serialise cache: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RouterError::cache_store(format!("failed to create {}: {e}", parent.display())))?;
        }
        // Write then rename so a crash never leaves a half-written cache
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| RouterError::cache_store(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RouterError::cache_store(format!("failed to replace {}: {e}", path.display())))?;

        self.dirty.store(false, Ordering::Relaxed);
        debug!(path = %path.display(), entries = count, "Embedding cache flushed");
        Ok(count)
    }

    /// Flush only if something changed since the last flush
    pub async fn flush_if_dirty(&self) -> RouterResult<usize> {
        if self.dirty.load(Ordering::Relaxed) {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Drop every entry and delete the backing file
    pub async fn clear(&self) -> RouterResult<()> {
        self.entries.write().await.clear();
        self.dirty.store(false, Ordering::Relaxed);

        if let Some(path) = &self.settings.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => info!(path = %path.display(), "Embedding cache file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RouterError::cache_store(format!(
                        "failed to remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Flush changed entries every `interval` until the task is aborted
    pub fn spawn_periodic_flush(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = cache.flush_if_dirty().await {
                    warn!(error = %e.sanitized(), "Periodic embedding cache flush failed");
                }
            }
        })
    }
}
