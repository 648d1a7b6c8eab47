use std::sync::Arc;

use anyhow::Result;

use crate::documents::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use crate::pg;
use crate::sketches::{MemorySketches, PgSketches, Sketches};
use crate::stream::{MemoryStreamLog, PgStreamLog, StreamLog};
use crate::vectors::{
    CacheStore, MemoryCacheStore, MemoryRoutingStore, PgCacheStore, PgRoutingStore, RoutingStore,
};

/// Every storage port, constructed once at startup and handed to workers.
#[derive(Clone)]
pub struct Backend {
    pub log: Arc<dyn StreamLog>,
    pub documents: Arc<dyn DocumentStore>,
    pub sketches: Arc<dyn Sketches>,
    pub routing: Arc<dyn RoutingStore>,
    pub cache: Arc<dyn CacheStore>,
}

impl Backend {
    /// Single-process backend. Nothing survives a restart.
    pub fn memory() -> Self {
        Self {
            log: Arc::new(MemoryStreamLog::new()),
            documents: Arc::new(MemoryDocumentStore::new()),
            sketches: Arc::new(MemorySketches::new()),
            routing: Arc::new(MemoryRoutingStore::new()),
            cache: Arc::new(MemoryCacheStore::new()),
        }
    }

    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = pg::connect(database_url, max_connections).await?;
        Ok(Self {
            log: Arc::new(PgStreamLog::new(pool.clone())),
            documents: Arc::new(PgDocumentStore::new(pool.clone())),
            sketches: Arc::new(PgSketches::new(pool.clone())),
            routing: Arc::new(PgRoutingStore::new(pool.clone())),
            cache: Arc::new(PgCacheStore::new(pool)),
        })
    }

    /// Postgres when a URL is configured, memory otherwise.
    pub async fn from_url(database_url: Option<&str>, max_connections: u32) -> Result<Self> {
        match database_url {
            Some(url) => Self::postgres(url, max_connections).await,
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory backend");
                Ok(Self::memory())
            }
        }
    }
}
