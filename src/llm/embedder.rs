//! Content-hash caching layer over an embedding backend.
//!
//! Embeddings are deterministic for fixed inputs, so repeated texts (shared
//! headings across re-ingestions, repeated retrieval queries) are served
//! from a process-local cache. The cache is bounded; when it fills, it is
//! dropped wholesale rather than tracked with an eviction order.

use crate::llm::provider::Embedder;
use crate::utils::error::PlanweaveError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};

const DEFAULT_CACHE_CAPACITY: usize = 50_000;

pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<HashMap<u64, Vec<f32>>>,
    capacity: usize,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_capacity(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of cached embeddings.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn content_hash(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    fn cache_get(&self, key: u64) -> Option<Vec<f32>> {
        self.cache.lock().ok().and_then(|c| c.get(&key).cloned())
    }

    fn cache_put(&self, key: u64, vector: Vec<f32>) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.capacity {
                cache.clear();
            }
            cache.insert(key, vector);
        }
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError> {
        let key = Self::content_hash(text);
        if let Some(vector) = self.cache_get(key) {
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.cache_put(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError> {
        // Only the misses go to the backend; results merge back in input order
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = Self::content_hash(text);
            match self.cache_get(key) {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    misses.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(PlanweaveError::Backend {
                    backend: self.inner.model().to_string(),
                    message: format!(
                        "Embedding batch returned {} vectors for {} inputs",
                        fresh.len(),
                        miss_texts.len()
                    ),
                });
            }
            for (slot, vector) in misses.iter().zip(fresh) {
                let key = Self::content_hash(&texts[*slot]);
                self.cache_put(key, vector.clone());
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder that counts backend calls.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanweaveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PlanweaveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "counting-test"
        }
    }

    #[tokio::test]
    async fn test_repeat_embed_hits_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let caching = CachingEmbedder::new(Arc::clone(&inner) as Arc<dyn Embedder>);

        let first = caching.embed("triage protocol").await.unwrap();
        let second = caching.embed("triage protocol").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(caching.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_only_fetches_misses() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let caching = CachingEmbedder::new(Arc::clone(&inner) as Arc<dyn Embedder>);

        caching.embed("alpha").await.unwrap();

        let vectors = caching
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![5.0, 1.0]);
        // One call for "alpha", one batch call for the "beta" miss
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(caching.cached_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_purges_at_capacity() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let caching = CachingEmbedder::with_capacity(Arc::clone(&inner) as Arc<dyn Embedder>, 2);

        caching.embed("one").await.unwrap();
        caching.embed("two").await.unwrap();
        caching.embed("three").await.unwrap();

        // Capacity purge dropped the first two entries
        assert_eq!(caching.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let caching = CachingEmbedder::new(Arc::clone(&inner) as Arc<dyn Embedder>);

        let vectors = caching.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }
}
