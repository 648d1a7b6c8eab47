//! Wiring of long-lived collaborators into stages and worker pools.
//!
//! Everything is constructed once at startup and passed in explicitly.

use std::sync::Arc;

use anyhow::Result;
use skytrend_common::FileConfig;
use skytrend_store::{Backend, IndexSchema};
use tracing::info;

use crate::classifier::{ContentFilter, TextClassifier};
use crate::runtime::{ConsumerSettings, WorkerPool};
use crate::stages::{
    bloom_params, EmbedStage, FilterStage, IngestWorker, TopicStage, EMBED_BLOOM, EMBED_GROUP,
    FILTER_BLOOM, FILTER_GROUP, TOPIC_BLOOM, TOPIC_GROUP,
};
use crate::topics::TopicExtractor;
use crate::traits::{ChatModel, TextEmbedder};

/// Lengths and pending counts reported by `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub stream: String,
    pub len: u64,
    pub pending: Vec<(String, u64)>,
}

#[derive(Clone)]
pub struct Pipeline {
    pub backend: Backend,
    pub config: FileConfig,
}

impl Pipeline {
    pub fn new(backend: Backend, config: FileConfig) -> Self {
        Self { backend, config }
    }

    /// Register the document index and reserve every stage's dedup filter.
    pub async fn prepare(&self) -> Result<()> {
        self.backend
            .documents
            .register_schema(&IndexSchema::filtered_documents(
                self.config.models.document_dimensions,
            ))
            .await?;

        let params = bloom_params(&self.config.sketches);
        for name in [FILTER_BLOOM, EMBED_BLOOM, TOPIC_BLOOM] {
            self.backend.sketches.bloom_reserve(name, params).await?;
        }
        info!("Pipeline storage prepared");
        Ok(())
    }

    pub fn ingest_worker(&self) -> IngestWorker {
        IngestWorker::new(
            self.backend.log.clone(),
            &self.config.streams.raw,
            self.config.streams.max_len,
            self.config.firehose.clone(),
        )
    }

    pub fn filter_stage(&self, classifier: Arc<dyn TextClassifier>) -> FilterStage {
        FilterStage::new(
            self.backend.log.clone(),
            self.backend.documents.clone(),
            self.backend.sketches.clone(),
            ContentFilter::new(classifier, &self.config.filter),
            &self.config.streams.filtered,
            self.config.streams.max_len,
        )
    }

    pub fn embed_stage(&self, embedder: Arc<dyn TextEmbedder>) -> EmbedStage {
        EmbedStage::new(
            self.backend.documents.clone(),
            self.backend.sketches.clone(),
            embedder,
        )
    }

    pub fn topic_extractor(&self, chat: Arc<dyn ChatModel>) -> TopicExtractor {
        TopicExtractor::new(
            chat,
            self.backend.sketches.clone(),
            self.config.prompts.topic_domain,
        )
    }

    pub fn topic_stage(&self, chat: Arc<dyn ChatModel>) -> TopicStage {
        TopicStage::new(
            self.backend.documents.clone(),
            self.backend.sketches.clone(),
            self.topic_extractor(chat),
            self.config.sketches.clone(),
        )
    }

    pub fn filter_pool(&self, classifier: Arc<dyn TextClassifier>) -> WorkerPool {
        let streams = &self.config.streams;
        WorkerPool::new(
            self.backend.log.clone(),
            ConsumerSettings::new(&streams.raw, FILTER_GROUP, streams),
            self.config.pools.filter,
            Arc::new(self.filter_stage(classifier)),
        )
    }

    pub fn embed_pool(&self, embedder: Arc<dyn TextEmbedder>) -> WorkerPool {
        let streams = &self.config.streams;
        WorkerPool::new(
            self.backend.log.clone(),
            ConsumerSettings::new(&streams.filtered, EMBED_GROUP, streams),
            self.config.pools.embed,
            Arc::new(self.embed_stage(embedder)),
        )
    }

    pub fn topic_pool(&self, chat: Arc<dyn ChatModel>) -> WorkerPool {
        let streams = &self.config.streams;
        WorkerPool::new(
            self.backend.log.clone(),
            ConsumerSettings::new(&streams.filtered, TOPIC_GROUP, streams),
            self.config.pools.topics,
            Arc::new(self.topic_stage(chat)),
        )
    }

    /// Stream lengths and per-group pending counts.
    pub async fn status(&self) -> Result<Vec<StreamStatus>> {
        let streams = &self.config.streams;
        let layout = [
            (streams.raw.as_str(), vec![FILTER_GROUP]),
            (streams.filtered.as_str(), vec![EMBED_GROUP, TOPIC_GROUP]),
        ];

        let mut out = Vec::new();
        for (stream, groups) in layout {
            let len = self.backend.log.len(stream).await?;
            let mut pending = Vec::new();
            for group in groups {
                pending.push((group.to_string(), self.backend.log.pending_count(stream, group).await?));
            }
            out.push(StreamStatus {
                stream: stream.to_string(),
                len,
                pending,
            });
        }
        Ok(out)
    }
}
