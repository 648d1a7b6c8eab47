use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use skytrend_common::{cosine_distance, FilteredDocument};
use tokio::sync::RwLock;

use super::{DocumentStore, FieldUpdate};
use crate::schema::IndexSchema;

#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, FilteredDocument>>,
    schema: RwLock<Option<IndexSchema>>,
    embedding_writes: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `TextEmbedding` updates so far.
    pub fn embedding_writes(&self) -> u64 {
        self.embedding_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        *self.schema.write().await = Some(schema.clone());
        Ok(())
    }

    async fn upsert(&self, doc: &FilteredDocument) -> Result<()> {
        if doc.id != doc.post.uri {
            bail!("document id {} does not match uri {}", doc.id, doc.post.uri);
        }
        let mut docs = self.docs.write().await;
        match docs.get_mut(&doc.id) {
            Some(existing) => existing.post = doc.post.clone(),
            None => {
                docs.insert(doc.id.clone(), doc.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FilteredDocument>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn update_field(&self, id: &str, update: FieldUpdate) -> Result<bool> {
        if let FieldUpdate::TextEmbedding(vector) = &update {
            if let Some(schema) = self.schema.read().await.as_ref() {
                schema.check_vector(vector)?;
            }
        }

        let mut docs = self.docs.write().await;
        let Some(doc) = docs.get_mut(id) else {
            return Ok(false);
        };
        match update {
            FieldUpdate::TextEmbedding(vector) => {
                doc.text_embedding = Some(vector);
                self.embedding_writes.fetch_add(1, Ordering::Relaxed);
            }
            FieldUpdate::Topics(topics) => doc.topics = topics,
        }
        Ok(true)
    }

    async fn find_by_topic_intersection(&self, topics: &[String]) -> Result<Vec<FilteredDocument>> {
        let wanted: HashSet<&str> = topics.iter().map(String::as_str).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|d| d.topics.iter().any(|t| wanted.contains(t.as_str())))
            .cloned()
            .collect())
    }

    async fn vector_knn(
        &self,
        vector: &[f32],
        k: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<(FilteredDocument, f64)>> {
        let docs = self.docs.read().await;
        let mut scored: Vec<(FilteredDocument, f64)> = docs
            .values()
            .filter_map(|d| {
                let emb = d.text_embedding.as_ref()?;
                let distance = cosine_distance(vector, emb);
                Some((d.clone(), distance))
            })
            .filter(|(_, distance)| max_distance.map_or(true, |max| *distance <= max))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.docs.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skytrend_common::{Operation, PostEvent};

    fn doc(rkey: &str, text: &str) -> FilteredDocument {
        FilteredDocument::from_event(PostEvent {
            uri: PostEvent::post_uri("d1", rkey),
            did: "d1".into(),
            rkey: rkey.into(),
            text: text.into(),
            time_us: 1,
            operation: Operation::Create,
            parent_uri: None,
            root_uri: None,
            langs: vec!["en".into()],
            created_at: None,
        })
    }

    #[tokio::test]
    async fn upsert_keeps_enrichment_fields() {
        let store = MemoryDocumentStore::new();
        let d = doc("k1", "first");
        store.upsert(&d).await.unwrap();
        store
            .update_field(&d.id, FieldUpdate::Topics(vec!["AI".into()]))
            .await
            .unwrap();

        let mut again = doc("k1", "edited");
        again.topics.clear();
        store.upsert(&again).await.unwrap();

        let stored = store.get(&d.id).await.unwrap().unwrap();
        assert_eq!(stored.text(), "edited");
        assert_eq!(stored.topics, vec!["AI".to_string()]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_on_missing_document_reports_false() {
        let store = MemoryDocumentStore::new();
        let updated = store
            .update_field("at://nobody/app.bsky.feed.post/x", FieldUpdate::Topics(vec![]))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn embedding_dimension_follows_schema() {
        let store = MemoryDocumentStore::new();
        store.register_schema(&IndexSchema::filtered_documents(3)).await.unwrap();
        let d = doc("k1", "x");
        store.upsert(&d).await.unwrap();

        assert!(store
            .update_field(&d.id, FieldUpdate::TextEmbedding(vec![1.0, 0.0]))
            .await
            .is_err());
        assert!(store
            .update_field(&d.id, FieldUpdate::TextEmbedding(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap());
        assert_eq!(store.embedding_writes(), 1);
    }

    #[tokio::test]
    async fn topic_intersection() {
        let store = MemoryDocumentStore::new();
        for (rkey, topics) in [("a", vec!["AI", "OpenAI"]), ("b", vec!["NATO"]), ("c", vec![])] {
            let d = doc(rkey, rkey);
            store.upsert(&d).await.unwrap();
            store
                .update_field(&d.id, FieldUpdate::Topics(topics.into_iter().map(String::from).collect()))
                .await
                .unwrap();
        }

        let hits = store
            .find_by_topic_intersection(&["OpenAI".into(), "Climate".into()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post.rkey, "a");
        assert!(store.find_by_topic_intersection(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn knn_orders_by_distance_and_respects_cutoff() {
        let store = MemoryDocumentStore::new();
        for (rkey, v) in [("a", vec![1.0, 0.0]), ("b", vec![0.7, 0.7]), ("c", vec![0.0, 1.0])] {
            let d = doc(rkey, rkey);
            store.upsert(&d).await.unwrap();
            store.update_field(&d.id, FieldUpdate::TextEmbedding(v)).await.unwrap();
        }

        let hits = store.vector_knn(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.post.rkey, "a");
        assert_eq!(hits[1].0.post.rkey, "b");

        let close = store.vector_knn(&[1.0, 0.0], 10, Some(0.1)).await.unwrap();
        assert_eq!(close.len(), 1);
    }
}
