//! The four pipeline stages. Stages talk to each other only through the
//! `raw` and `filtered` logs and the document store.

pub mod embed;
pub mod filter;
pub mod ingest;
pub mod topics;

pub use embed::EmbedStage;
pub use filter::FilterStage;
pub use ingest::IngestWorker;
pub use topics::TopicStage;

use skytrend_common::PostEvent;
use skytrend_store::{BloomParams, StreamEntry};

use crate::runtime::StageError;

// --- Consumer groups ---

pub const FILTER_GROUP: &str = "filter-group";
pub const EMBED_GROUP: &str = "embeddings-group";
pub const TOPIC_GROUP: &str = "topic-extraction-group";

// --- Per-stage dedup filters ---

pub const FILTER_BLOOM: &str = "filter-dedup-bf";
pub const EMBED_BLOOM: &str = "embeddings-dedup-bf";
pub const TOPIC_BLOOM: &str = "topic-extraction-dedup-bf";

/// Rebuild the post carried by a log entry. A malformed entry is an item error.
pub(crate) fn post_from_entry(entry: &StreamEntry) -> Result<PostEvent, StageError> {
    PostEvent::from_fields(&entry.fields).map_err(StageError::item)
}

pub(crate) fn bloom_params(config: &skytrend_common::file_config::SketchesConfig) -> BloomParams {
    BloomParams::new(config.bloom_capacity, config.bloom_error_rate)
}
