//! Storage ports for the skytrend pipeline and bot, with an in-process
//! memory backend and a Postgres (`sqlx` + `pgvector`) backend.

pub mod backend;
pub mod documents;
pub mod pg;
pub mod schema;
pub mod sketches;
pub mod stream;
pub mod vectors;

pub use backend::Backend;
pub use documents::{DocumentStore, FieldUpdate, MemoryDocumentStore, PgDocumentStore};
pub use schema::{IndexSchema, IndexedField, Metric};
pub use sketches::{BloomParams, MemorySketches, PgSketches, Sketches, TopKParams};
pub use stream::{EntryId, MemoryStreamLog, PgStreamLog, StreamEntry, StreamLog};
pub use vectors::{
    CacheStore, MemoryCacheStore, MemoryRoutingStore, PgCacheStore, PgRoutingStore, RoutingStore,
};
