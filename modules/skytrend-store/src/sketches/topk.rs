use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{seeded_hash, slots};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopKParams {
    pub k: usize,
    pub width: usize,
    pub depth: usize,
    pub decay: f64,
}

impl Default for TopKParams {
    fn default() -> Self {
        Self {
            k: 15,
            width: 3000,
            depth: 10,
            decay: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    fingerprint: u64,
    count: u64,
}

/// HeavyKeeper Top-K: a `depth x width` table of fingerprinted counters with
/// exponential decay on collisions, plus the current top `k` items.
#[derive(Debug, Clone)]
pub struct HeavyKeeper {
    params: TopKParams,
    buckets: Vec<Bucket>,
    top: Vec<(String, u64)>,
    rng: StdRng,
}

const FINGERPRINT_SEED: u64 = 0x9e37_79b1_85eb_ca87;

impl HeavyKeeper {
    pub fn new(params: TopKParams) -> Self {
        Self::with_rng(params, StdRng::from_os_rng())
    }

    /// Deterministic decay decisions, for tests.
    pub fn seeded(params: TopKParams, seed: u64) -> Self {
        Self::with_rng(params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(params: TopKParams, rng: StdRng) -> Self {
        let width = params.width.max(1);
        let depth = params.depth.max(1);
        Self {
            params: TopKParams { width, depth, ..params },
            buckets: vec![Bucket::default(); width * depth],
            top: Vec::with_capacity(params.k + 1),
            rng,
        }
    }

    pub fn params(&self) -> TopKParams {
        self.params
    }

    pub fn incr_by(&mut self, item: &str, increment: u64) {
        let fp = seeded_hash(item.as_bytes(), FINGERPRINT_SEED).max(1);
        let width = self.params.width;
        let mut estimate = 0u64;

        let cols: Vec<u64> = slots(item, self.params.depth, width as u64).collect();
        for (row, col) in cols.into_iter().enumerate() {
            let idx = row * width + col as usize;
            for _ in 0..increment {
                let bucket = &mut self.buckets[idx];
                if bucket.count == 0 {
                    bucket.fingerprint = fp;
                    bucket.count = 1;
                } else if bucket.fingerprint == fp {
                    bucket.count += 1;
                } else {
                    let p = self.params.decay.powf(bucket.count as f64);
                    if self.rng.random::<f64>() < p {
                        bucket.count -= 1;
                        if bucket.count == 0 {
                            bucket.fingerprint = fp;
                            bucket.count = 1;
                        }
                    }
                }
            }
            let bucket = self.buckets[idx];
            if bucket.fingerprint == fp {
                estimate = estimate.max(bucket.count);
            }
        }

        self.update_top(item, estimate);
    }

    fn update_top(&mut self, item: &str, estimate: u64) {
        if estimate == 0 {
            return;
        }
        if let Some(slot) = self.top.iter_mut().find(|(name, _)| name == item) {
            slot.1 = slot.1.max(estimate);
        } else if self.top.len() < self.params.k {
            self.top.push((item.to_string(), estimate));
        } else if let Some(min) = self.top.iter_mut().min_by_key(|(_, c)| *c) {
            if estimate > min.1 {
                *min = (item.to_string(), estimate);
            }
        }
        self.top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    }

    /// Top items, most frequent first.
    pub fn list(&self) -> Vec<(String, u64)> {
        self.top.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TopKParams {
        TopKParams {
            k: 3,
            width: 100,
            depth: 4,
            decay: 0.9,
        }
    }

    #[test]
    fn counts_are_exact_without_collisions() {
        let mut tk = HeavyKeeper::seeded(small(), 7);
        tk.incr_by("LangChain", 1);
        tk.incr_by("OpenAI", 1);
        tk.incr_by("OpenAI", 2);
        let list = tk.list();
        assert_eq!(list[0], ("OpenAI".to_string(), 3));
        assert_eq!(list[1], ("LangChain".to_string(), 1));
    }

    #[test]
    fn keeps_only_k_heaviest() {
        let mut tk = HeavyKeeper::seeded(small(), 7);
        for (item, n) in [("a", 10), ("b", 8), ("c", 6), ("d", 1)] {
            tk.incr_by(item, n);
        }
        let names: Vec<_> = tk.list().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        tk.incr_by("d", 20);
        let names: Vec<_> = tk.list().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "d");
        assert!(!names.contains(&"c".to_string()));
    }

    #[test]
    fn heavy_hitter_survives_noise() {
        let mut tk = HeavyKeeper::seeded(TopKParams { k: 5, width: 50, depth: 3, decay: 0.9 }, 42);
        for i in 0..2_000 {
            tk.incr_by(&format!("noise-{i}"), 1);
            if i % 4 == 0 {
                tk.incr_by("AI Safety", 1);
            }
        }
        assert_eq!(tk.list()[0].0, "AI Safety");
    }
}
