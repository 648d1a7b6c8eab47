use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skytrend_common::file_config::SketchesConfig;
use skytrend_common::text::{cms_key, topk_key};
use skytrend_common::{Aggregator, FilteredDocument};
use skytrend_store::{DocumentStore, FieldUpdate, Sketches, StreamEntry, TopKParams};
use tracing::info;

use super::{post_from_entry, TOPIC_BLOOM};
use crate::runtime::{Outcome, StageError, StageHandler};
use crate::topics::TopicExtractor;

/// Source of "now" for hour buckets.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// `filtered` → document `topics`, topic universe, hourly frequencies.
pub struct TopicStage {
    documents: Arc<dyn DocumentStore>,
    sketches: Arc<dyn Sketches>,
    extractor: TopicExtractor,
    config: SketchesConfig,
    clock: Clock,
}

impl TopicStage {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        sketches: Arc<dyn Sketches>,
        extractor: TopicExtractor,
        config: SketchesConfig,
    ) -> Self {
        Self {
            documents,
            sketches,
            extractor,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn topk_params(&self) -> TopKParams {
        TopKParams {
            k: self.config.topk_k,
            width: self.config.topk_width,
            depth: self.config.topk_depth,
            decay: self.config.topk_decay,
        }
    }

    /// One increment per distinct topic into the current hour's aggregates.
    async fn count(&self, topics: &[String]) -> anyhow::Result<()> {
        if topics.is_empty() {
            return Ok(());
        }
        let now = (self.clock)();
        let items: Vec<(String, u64)> = topics.iter().map(|t| (t.clone(), 1)).collect();
        let aggregator: Aggregator = self.config.aggregator;

        if aggregator.uses_topk() {
            let key = topk_key(now);
            self.sketches.topk_reserve(&key, self.topk_params()).await?;
            self.sketches.topk_incr_by(&key, &items).await?;
        }
        if aggregator.uses_cms() {
            let key = cms_key(now);
            self.sketches
                .cms_reserve(&key, self.config.cms_width, self.config.cms_depth)
                .await?;
            self.sketches.cms_incr_by(&key, &items).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StageHandler for TopicStage {
    fn name(&self) -> &'static str {
        "topics"
    }

    async fn handle(&self, entry: &StreamEntry) -> Result<Outcome, StageError> {
        let post = post_from_entry(entry)?;

        if self
            .sketches
            .bloom_exists(TOPIC_BLOOM, &post.uri)
            .await
            .map_err(StageError::transient)?
        {
            return Ok(Outcome::Skipped("duplicate"));
        }

        let topics = self
            .extractor
            .extract(&post.text)
            .await
            .map_err(StageError::transient)?;

        if !topics.is_empty() {
            self.extractor
                .remember(&topics)
                .await
                .map_err(StageError::transient)?;
        }

        let uri = post.uri.clone();
        let updated = self
            .documents
            .update_field(&uri, FieldUpdate::Topics(topics.clone()))
            .await
            .map_err(StageError::transient)?;
        if !updated {
            let mut doc = FilteredDocument::from_event(post);
            doc.topics = topics.clone();
            self.documents
                .upsert(&doc)
                .await
                .map_err(StageError::transient)?;
        }

        self.count(&topics).await.map_err(StageError::transient)?;
        self.sketches
            .bloom_add(TOPIC_BLOOM, &uri)
            .await
            .map_err(StageError::transient)?;

        info!(uri = %uri, topics = ?topics, "Topics recorded");
        Ok(Outcome::Processed)
    }
}
