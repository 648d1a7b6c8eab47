use std::sync::Arc;

use async_trait::async_trait;
use skytrend_common::FilteredDocument;
use skytrend_store::{DocumentStore, Sketches, StreamEntry, StreamLog};
use tracing::info;

use super::{post_from_entry, FILTER_BLOOM};
use crate::classifier::ContentFilter;
use crate::runtime::{Outcome, StageError, StageHandler};

/// `raw` → dedup → triviality → classifier → document store + `filtered`.
pub struct FilterStage {
    log: Arc<dyn StreamLog>,
    documents: Arc<dyn DocumentStore>,
    sketches: Arc<dyn Sketches>,
    gate: ContentFilter,
    filtered_stream: String,
    max_len: u64,
}

impl FilterStage {
    pub fn new(
        log: Arc<dyn StreamLog>,
        documents: Arc<dyn DocumentStore>,
        sketches: Arc<dyn Sketches>,
        gate: ContentFilter,
        filtered_stream: impl Into<String>,
        max_len: u64,
    ) -> Self {
        Self {
            log,
            documents,
            sketches,
            gate,
            filtered_stream: filtered_stream.into(),
            max_len,
        }
    }
}

#[async_trait]
impl StageHandler for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn handle(&self, entry: &StreamEntry) -> Result<Outcome, StageError> {
        let post = post_from_entry(entry)?;

        if self
            .sketches
            .bloom_exists(FILTER_BLOOM, &post.uri)
            .await
            .map_err(StageError::transient)?
        {
            return Ok(Outcome::Skipped("duplicate"));
        }

        if post.is_trivial() {
            return Ok(Outcome::Skipped("trivial"));
        }

        if !self.gate.accepts(&post.text).await {
            return Ok(Outcome::Skipped("off-topic"));
        }

        // Document first, downstream log second, dedup mark last; the runtime
        // acks only after all three succeed.
        let fields = post.to_fields();
        let doc = FilteredDocument::from_event(post);
        self.documents
            .upsert(&doc)
            .await
            .map_err(StageError::transient)?;
        self.log
            .append(&self.filtered_stream, &fields, self.max_len)
            .await
            .map_err(StageError::transient)?;
        self.sketches
            .bloom_add(FILTER_BLOOM, &doc.id)
            .await
            .map_err(StageError::transient)?;

        info!(uri = %doc.id, "Post accepted");
        Ok(Outcome::Processed)
    }
}
