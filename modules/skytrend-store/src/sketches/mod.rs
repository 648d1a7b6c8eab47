//! Probabilistic structures shared across pipeline replicas: Bloom filters
//! for dedup, Top-K and Count-Min for topic frequencies, and plain sets.
//!
//! Every `reserve` call is idempotent; reserving a name that already exists
//! keeps the existing structure and its parameters.

mod bloom;
mod cms;
mod memory;
mod postgres;
mod topk;

pub use bloom::{BloomFilter, BloomParams};
pub use cms::CountMinSketch;
pub use memory::MemorySketches;
pub use postgres::PgSketches;
pub use topk::{HeavyKeeper, TopKParams};

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Sketches: Send + Sync {
    // --- Bloom ---

    async fn bloom_reserve(&self, name: &str, params: BloomParams) -> Result<()>;

    /// Missing filters contain nothing.
    async fn bloom_exists(&self, name: &str, item: &str) -> Result<bool>;

    /// Returns true if the item was not present before. Adding to a missing
    /// filter reserves it with default parameters first.
    async fn bloom_add(&self, name: &str, item: &str) -> Result<bool>;

    // --- Top-K ---

    async fn topk_reserve(&self, name: &str, params: TopKParams) -> Result<()>;

    /// Adding to a missing Top-K reserves it with default parameters first.
    async fn topk_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()>;

    /// Current heavy hitters, most frequent first. Missing structures are empty.
    async fn topk_list(&self, name: &str) -> Result<Vec<(String, u64)>>;

    // --- Count-Min ---

    async fn cms_reserve(&self, name: &str, width: usize, depth: usize) -> Result<()>;

    async fn cms_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()>;

    /// Estimated count, never below the true count.
    async fn cms_query(&self, name: &str, item: &str) -> Result<u64>;

    // --- Sets ---

    async fn set_add(&self, name: &str, members: &[String]) -> Result<()>;

    /// Sorted members.
    async fn set_members(&self, name: &str) -> Result<Vec<String>>;
}

// --- Hashing ---

const HASH_SEEDS: [u64; 2] = [0x517c_c1b7_2722_0a95, 0x6d0f_27bd_ceb7_b067];

/// Seeded 64-bit mix over raw bytes.
pub(crate) fn seeded_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    hash ^ (hash >> 33)
}

/// Two independent hashes for double hashing: `h1 + i * h2`.
pub(crate) fn hash_pair(item: &str) -> (u64, u64) {
    let bytes = item.as_bytes();
    let h1 = seeded_hash(bytes, HASH_SEEDS[0]);
    // Odd step so every slot is reachable for power-of-two widths.
    let h2 = seeded_hash(bytes, HASH_SEEDS[1]) | 1;
    (h1, h2)
}

/// `count` slot indexes in `[0, modulus)` for `item`.
pub(crate) fn slots(item: &str, count: usize, modulus: u64) -> impl Iterator<Item = u64> {
    let (h1, h2) = hash_pair(item);
    (0..count as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % modulus.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_pair("at://d1/app.bsky.feed.post/k1"), hash_pair("at://d1/app.bsky.feed.post/k1"));
        assert_ne!(hash_pair("a").0, hash_pair("b").0);
    }

    #[test]
    fn slots_stay_in_range() {
        for slot in slots("topic", 10, 3000) {
            assert!(slot < 3000);
        }
        assert_eq!(slots("topic", 7, 100).count(), 7);
    }
}
