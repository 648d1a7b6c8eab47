use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BloomFilter, BloomParams, CountMinSketch, HeavyKeeper, Sketches, TopKParams};

#[derive(Default)]
struct State {
    blooms: HashMap<String, BloomFilter>,
    topks: HashMap<String, HeavyKeeper>,
    cms: HashMap<String, CountMinSketch>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// In-process sketches. A single lock keeps each call atomic.
#[derive(Default)]
pub struct MemorySketches {
    state: Mutex<State>,
    topk_seed: Option<u64>,
}

impl MemorySketches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-K decay decisions become reproducible.
    pub fn with_topk_seed(seed: u64) -> Self {
        Self {
            topk_seed: Some(seed),
            ..Self::default()
        }
    }

    fn new_topk(&self, params: TopKParams) -> HeavyKeeper {
        match self.topk_seed {
            Some(seed) => HeavyKeeper::seeded(params, seed),
            None => HeavyKeeper::new(params),
        }
    }
}

#[async_trait]
impl Sketches for MemorySketches {
    async fn bloom_reserve(&self, name: &str, params: BloomParams) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .blooms
            .entry(name.to_string())
            .or_insert_with(|| BloomFilter::new(params));
        Ok(())
    }

    async fn bloom_exists(&self, name: &str, item: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.blooms.get(name).is_some_and(|f| f.contains(item)))
    }

    async fn bloom_add(&self, name: &str, item: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let filter = state
            .blooms
            .entry(name.to_string())
            .or_insert_with(|| BloomFilter::new(BloomParams::default()));
        Ok(filter.insert(item))
    }

    async fn topk_reserve(&self, name: &str, params: TopKParams) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.topks.contains_key(name) {
            let topk = self.new_topk(params);
            state.topks.insert(name.to_string(), topk);
        }
        Ok(())
    }

    async fn topk_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.topks.contains_key(name) {
            let topk = self.new_topk(TopKParams::default());
            state.topks.insert(name.to_string(), topk);
        }
        if let Some(topk) = state.topks.get_mut(name) {
            for (item, n) in items {
                topk.incr_by(item, *n);
            }
        }
        Ok(())
    }

    async fn topk_list(&self, name: &str) -> Result<Vec<(String, u64)>> {
        let state = self.state.lock().await;
        Ok(state.topks.get(name).map(HeavyKeeper::list).unwrap_or_default())
    }

    async fn cms_reserve(&self, name: &str, width: usize, depth: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .cms
            .entry(name.to_string())
            .or_insert_with(|| CountMinSketch::new(width, depth));
        Ok(())
    }

    async fn cms_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()> {
        let mut state = self.state.lock().await;
        let cms = state
            .cms
            .entry(name.to_string())
            .or_insert_with(|| CountMinSketch::new(3000, 10));
        for (item, n) in items {
            cms.incr_by(item, *n);
        }
        Ok(())
    }

    async fn cms_query(&self, name: &str, item: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.cms.get(name).map(|c| c.query(item)).unwrap_or(0))
    }

    async fn set_add(&self, name: &str, members: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(name.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn set_members(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
