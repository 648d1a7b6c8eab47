use std::sync::Arc;

use anyhow::Result;
use skytrend_common::CacheEntry;
use skytrend_pipeline::TextEmbedder;
use skytrend_store::{CacheStore, IndexSchema};
use tracing::debug;

/// Result of a cache lookup. A miss carries the query embedding so the
/// answer can be stored without embedding twice.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit { answer: String, distance: f64 },
    Miss { embedding: Vec<f32> },
}

impl CacheLookup {
    pub fn answer(&self) -> Option<&str> {
        match self {
            CacheLookup::Hit { answer, .. } => Some(answer),
            CacheLookup::Miss { .. } => None,
        }
    }
}

/// Nearest-neighbour answer cache over post embeddings. Entries never expire.
#[derive(Clone)]
pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    embedder: Arc<dyn TextEmbedder>,
    max_distance: f64,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, embedder: Arc<dyn TextEmbedder>, max_distance: f64) -> Self {
        Self {
            store,
            embedder,
            max_distance,
        }
    }

    pub async fn prepare(&self) -> Result<()> {
        self.store
            .register_schema(&IndexSchema::semantic_cache(self.embedder.dimensions()))
            .await
    }

    /// Hit iff the closest stored post is strictly within `max_distance`.
    pub async fn lookup(&self, post: &str) -> Result<CacheLookup> {
        let embedding = self.embedder.embed(post).await?;
        match self.store.nearest(&embedding).await? {
            Some((entry, distance)) if distance < self.max_distance => {
                debug!(distance, cached = %entry.post, "Semantic cache hit");
                Ok(CacheLookup::Hit {
                    answer: entry.answer,
                    distance,
                })
            }
            _ => Ok(CacheLookup::Miss { embedding }),
        }
    }

    pub async fn get(&self, post: &str) -> Result<Option<String>> {
        Ok(self.lookup(post).await?.answer().map(str::to_string))
    }

    pub async fn put(&self, post: &str, answer: &str) -> Result<()> {
        let embedding = self.embedder.embed(post).await?;
        self.put_embedded(post, answer, embedding).await
    }

    pub async fn put_embedded(&self, post: &str, answer: &str, embedding: Vec<f32>) -> Result<()> {
        self.store
            .upsert(&CacheEntry::new(post.trim(), answer, embedding))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skytrend_pipeline::testing::{axis_vector, FixedEmbedder};
    use skytrend_store::MemoryCacheStore;

    const DIMS: usize = 128;

    fn cache(embedder: FixedEmbedder) -> (SemanticCache, Arc<FixedEmbedder>) {
        let embedder = Arc::new(embedder);
        let cache = SemanticCache::new(Arc::new(MemoryCacheStore::new()), embedder.clone(), 0.2);
        (cache, embedder)
    }

    #[tokio::test]
    async fn empty_cache_misses() {
        let (cache, _) = cache(FixedEmbedder::new(DIMS));
        cache.prepare().await.unwrap();
        assert!(cache.get("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hit_requires_distance_below_max() {
        // 0.7 → 0.181, 0.8 → 0.219.
        let (cache, _) = cache(
            FixedEmbedder::new(DIMS)
                .on_text("stored", axis_vector(DIMS, 3, 0.0))
                .on_text("close", axis_vector(DIMS, 3, 0.7))
                .on_text("drifted", axis_vector(DIMS, 3, 0.8)),
        );
        cache.prepare().await.unwrap();
        cache.put("stored", "answer").await.unwrap();

        assert_eq!(cache.get("close").await.unwrap().as_deref(), Some("answer"));
        assert!(cache.get("drifted").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn miss_embedding_is_reused_for_put() {
        let (cache, embedder) = cache(FixedEmbedder::new(DIMS));
        cache.prepare().await.unwrap();

        let CacheLookup::Miss { embedding } = cache.lookup("q").await.unwrap() else {
            panic!("expected a miss");
        };
        cache.put_embedded("q", "a", embedding).await.unwrap();

        assert_eq!(embedder.calls(), vec!["q"]);
        assert_eq!(cache.get("q").await.unwrap().as_deref(), Some("a"));
    }
}
