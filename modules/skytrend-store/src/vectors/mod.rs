//! Small vector collections fronting the bot: routing references and the
//! semantic cache. Both live in the query embedding space.

mod memory;
mod postgres;

pub use memory::{MemoryCacheStore, MemoryRoutingStore};
pub use postgres::{PgCacheStore, PgRoutingStore};

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::{CacheEntry, RoutingReference};

use crate::schema::IndexSchema;

#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    async fn insert(&self, reference: &RoutingReference) -> Result<()>;

    /// For every route, its closest reference and the cosine distance to it.
    /// Ordered by distance.
    async fn nearest_per_route(&self, vector: &[f32]) -> Result<Vec<(RoutingReference, f64)>>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()>;

    /// Last writer wins on identical ids.
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// Closest cached post and its cosine distance, if any entry exists.
    async fn nearest(&self, vector: &[f32]) -> Result<Option<(CacheEntry, f64)>>;

    async fn count(&self) -> Result<u64>;
}
