//! Bounded append-only logs with consumer groups.
//!
//! Delivery is at-least-once: an entry handed to a consumer stays pending
//! for its group until acked, and can be re-read by the same consumer or
//! claimed by another one once it has been idle long enough.

mod memory;
mod postgres;

pub use memory::MemoryStreamLog;
pub use postgres::PgStreamLog;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::StreamFields;

/// Monotonic per-stream entry id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub i64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: StreamFields,
    /// How many times this entry has been handed out to the group, this delivery included.
    pub deliveries: u32,
}

#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append and trim the stream to at most `max_len` entries, oldest first.
    async fn append(&self, stream: &str, fields: &StreamFields, max_len: u64) -> Result<EntryId>;

    /// Create a group reading from the start of the stream. Creates the
    /// stream if needed. An existing group is left untouched.
    async fn create_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Deliver up to `count` entries never delivered to this group before.
    /// Returns an empty batch when the stream is exhausted.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Re-deliver entries this consumer read but never acked.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Take over entries pending on other consumers for longer than `min_idle`.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Returns false when the entry was not pending (already acked or unknown).
    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool>;

    async fn len(&self, stream: &str) -> Result<u64>;

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;
}
