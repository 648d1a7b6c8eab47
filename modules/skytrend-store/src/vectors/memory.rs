use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::{cosine_distance, CacheEntry, Route, RoutingReference};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CacheStore, RoutingStore};
use crate::schema::IndexSchema;

#[derive(Default)]
pub struct MemoryRoutingStore {
    refs: RwLock<BTreeMap<Uuid, RoutingReference>>,
    schema: RwLock<Option<IndexSchema>>,
}

impl MemoryRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoutingStore for MemoryRoutingStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        *self.schema.write().await = Some(schema.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.refs.read().await.len() as u64)
    }

    async fn insert(&self, reference: &RoutingReference) -> Result<()> {
        if let Some(schema) = self.schema.read().await.as_ref() {
            schema.check_vector(&reference.text_embedding)?;
        }
        self.refs.write().await.insert(reference.id, reference.clone());
        Ok(())
    }

    async fn nearest_per_route(&self, vector: &[f32]) -> Result<Vec<(RoutingReference, f64)>> {
        let refs = self.refs.read().await;
        let mut best: HashMap<Route, (RoutingReference, f64)> = HashMap::new();
        for reference in refs.values() {
            let distance = cosine_distance(vector, &reference.text_embedding);
            match best.get(&reference.route) {
                Some((_, d)) if *d <= distance => {}
                _ => {
                    best.insert(reference.route, (reference.clone(), distance));
                }
            }
        }
        let mut out: Vec<_> = best.into_values().collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    schema: RwLock<Option<IndexSchema>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        *self.schema.write().await = Some(schema.clone());
        Ok(())
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        if let Some(schema) = self.schema.read().await.as_ref() {
            schema.check_vector(&entry.post_embedding)?;
        }
        self.entries.write().await.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<(CacheEntry, f64)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .map(|e| (e, cosine_distance(vector, &e.post_embedding)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, d)| (e.clone(), d)))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(route: Route, v: Vec<f32>, max_distance: f64) -> RoutingReference {
        RoutingReference {
            id: Uuid::new_v4(),
            text: format!("{route}"),
            route,
            max_distance,
            text_embedding: v,
        }
    }

    #[tokio::test]
    async fn nearest_is_reported_per_route() {
        let store = MemoryRoutingStore::new();
        store.insert(&reference(Route::TrendingTopics, vec![1.0, 0.0], 0.2)).await.unwrap();
        store.insert(&reference(Route::TrendingTopics, vec![0.9, 0.1], 0.2)).await.unwrap();
        store.insert(&reference(Route::Summarization, vec![0.0, 1.0], 0.55)).await.unwrap();

        let nearest = store.nearest_per_route(&[1.0, 0.0]).await.unwrap();
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].0.route, Route::TrendingTopics);
        assert!(nearest[0].1.abs() < 1e-6);
        assert_eq!(nearest[1].0.route, Route::Summarization);
    }

    #[tokio::test]
    async fn empty_routing_store_has_no_neighbours() {
        let store = MemoryRoutingStore::new();
        assert!(store.nearest_per_route(&[1.0]).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_upsert_overwrites_same_post() {
        let store = MemoryCacheStore::new();
        store.upsert(&CacheEntry::new("q", "old", vec![1.0, 0.0])).await.unwrap();
        store.upsert(&CacheEntry::new("q", "new", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let (hit, distance) = store.nearest(&[1.0, 0.0]).await.unwrap().unwrap();
        assert_eq!(hit.answer, "new");
        assert!(distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn cache_rejects_wrong_dimension() {
        let store = MemoryCacheStore::new();
        store.register_schema(&IndexSchema::semantic_cache(3)).await.unwrap();
        assert!(store.upsert(&CacheEntry::new("q", "a", vec![1.0])).await.is_err());
    }
}
