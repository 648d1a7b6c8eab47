use std::sync::Arc;

use async_trait::async_trait;
use skytrend_common::FilteredDocument;
use skytrend_store::{DocumentStore, FieldUpdate, Sketches, StreamEntry};
use tracing::debug;

use super::{post_from_entry, EMBED_BLOOM};
use crate::runtime::{Outcome, StageError, StageHandler};
use crate::traits::TextEmbedder;

/// `filtered` → document `text_embedding`.
pub struct EmbedStage {
    documents: Arc<dyn DocumentStore>,
    sketches: Arc<dyn Sketches>,
    embedder: Arc<dyn TextEmbedder>,
}

impl EmbedStage {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        sketches: Arc<dyn Sketches>,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Self {
        Self {
            documents,
            sketches,
            embedder,
        }
    }
}

#[async_trait]
impl StageHandler for EmbedStage {
    fn name(&self) -> &'static str {
        "embed"
    }

    async fn handle(&self, entry: &StreamEntry) -> Result<Outcome, StageError> {
        let post = post_from_entry(entry)?;

        if self
            .sketches
            .bloom_exists(EMBED_BLOOM, &post.uri)
            .await
            .map_err(StageError::transient)?
        {
            return Ok(Outcome::Skipped("duplicate"));
        }

        let doc = match self
            .documents
            .get(&post.uri)
            .await
            .map_err(StageError::transient)?
        {
            Some(doc) => doc,
            None => {
                // The filtered entry carries the full post; rebuild the document.
                let doc = FilteredDocument::from_event(post);
                self.documents
                    .upsert(&doc)
                    .await
                    .map_err(StageError::transient)?;
                doc
            }
        };

        let vector = self
            .embedder
            .embed(doc.text())
            .await
            .map_err(StageError::item)?;

        self.documents
            .update_field(&doc.id, FieldUpdate::TextEmbedding(vector))
            .await
            .map_err(StageError::transient)?;
        self.sketches
            .bloom_add(EMBED_BLOOM, &doc.id)
            .await
            .map_err(StageError::transient)?;

        debug!(uri = %doc.id, "Embedding stored");
        Ok(Outcome::Processed)
    }
}
