//! Persistence port for [`FilteredDocument`]s.

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::FilteredDocument;

use crate::schema::IndexSchema;

/// Partial update written by a later pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    TextEmbedding(Vec<f32>),
    Topics(Vec<String>),
}

impl FieldUpdate {
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldUpdate::TextEmbedding(_) => "text_embedding",
            FieldUpdate::Topics(_) => "topics",
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Declare the index before any write. Fails if the backing storage
    /// disagrees with the declared vector dimension.
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()>;

    /// Insert, or refresh the post fields of an existing document.
    /// Fields owned by later stages (embedding, topics) are preserved.
    async fn upsert(&self, doc: &FilteredDocument) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<FilteredDocument>>;

    /// Returns false when no document has this id.
    async fn update_field(&self, id: &str, update: FieldUpdate) -> Result<bool>;

    /// Documents whose topics share at least one entry with `topics`.
    async fn find_by_topic_intersection(&self, topics: &[String]) -> Result<Vec<FilteredDocument>>;

    /// Nearest documents by cosine distance over `text_embedding`, closest first.
    async fn vector_knn(
        &self,
        vector: &[f32],
        k: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<(FilteredDocument, f64)>>;

    async fn count(&self) -> Result<u64>;
}
