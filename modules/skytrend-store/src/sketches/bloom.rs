use std::collections::BTreeMap;

use super::slots;

/// Sizing for a Bloom filter, derived from expected capacity and target
/// false-positive rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomParams {
    pub capacity: u64,
    pub error_rate: f64,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            error_rate: 0.01,
        }
    }
}

impl BloomParams {
    pub fn new(capacity: u64, error_rate: f64) -> Self {
        Self { capacity, error_rate }
    }

    /// Total bits: `-n ln p / (ln 2)^2`, rounded up to whole 64-bit words.
    pub fn bits(&self) -> u64 {
        let n = self.capacity.max(1) as f64;
        let p = self.error_rate.clamp(1e-9, 0.5);
        let m = (-n * p.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
        m.max(64).div_ceil(64) * 64
    }

    /// Hash functions: `(m / n) ln 2`, at least one.
    pub fn hashes(&self) -> u32 {
        let n = self.capacity.max(1) as f64;
        let k = (self.bits() as f64 / n * std::f64::consts::LN_2).round() as u32;
        k.max(1)
    }
}

/// Bit positions for `item`, grouped by 64-bit word as `(word, mask)`.
pub(crate) fn word_masks(item: &str, bits: u64, hashes: u32) -> BTreeMap<u64, u64> {
    let mut words = BTreeMap::new();
    for idx in slots(item, hashes as usize, bits) {
        *words.entry(idx / 64).or_insert(0u64) |= 1u64 << (idx % 64);
    }
    words
}

/// In-memory Bloom filter over a `u64` word array.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    bits: u64,
    hashes: u32,
}

impl BloomFilter {
    pub fn new(params: BloomParams) -> Self {
        let bits = params.bits();
        Self {
            words: vec![0; (bits / 64) as usize],
            bits,
            hashes: params.hashes(),
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        word_masks(item, self.bits, self.hashes)
            .into_iter()
            .all(|(word, mask)| self.words[word as usize] & mask == mask)
    }

    /// Returns false when every bit was already set.
    pub fn insert(&mut self, item: &str) -> bool {
        let mut inserted = false;
        for (word, mask) in word_masks(item, self.bits, self.hashes) {
            let slot = &mut self.words[word as usize];
            if *slot & mask != mask {
                inserted = true;
                *slot |= mask;
            }
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizing_matches_one_percent_at_a_million() {
        let params = BloomParams::default();
        // ~9.59M bits, 7 hashes.
        assert!((9_500_000..9_700_000).contains(&params.bits()));
        assert_eq!(params.hashes(), 7);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(BloomParams::new(1_000, 0.01));
        for i in 0..1_000 {
            filter.insert(&format!("at://d/app.bsky.feed.post/{i}"));
        }
        for i in 0..1_000 {
            assert!(filter.contains(&format!("at://d/app.bsky.feed.post/{i}")));
        }
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        let mut filter = BloomFilter::new(BloomParams::new(1_000, 0.01));
        for i in 0..1_000 {
            filter.insert(&format!("in-{i}"));
        }
        let fp = (0..10_000).filter(|i| filter.contains(&format!("out-{i}"))).count();
        // Generous bound over the 1% target.
        assert!(fp < 500, "false positives: {fp}");
    }

    #[test]
    fn second_insert_reports_duplicate() {
        let mut filter = BloomFilter::new(BloomParams::new(100, 0.01));
        assert!(filter.insert("x"));
        assert!(!filter.insert("x"));
    }
}
