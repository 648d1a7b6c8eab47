use super::slots;

/// Count-Min sketch: `depth` rows of `width` counters; the estimate is the
/// row minimum, so it can overcount but never undercount.
#[derive(Debug, Clone)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<u64>,
}

impl CountMinSketch {
    pub fn new(width: usize, depth: usize) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);
        Self {
            width,
            depth,
            counters: vec![0; width * depth],
        }
    }

    /// `(row, col)` cells touched by `item`.
    pub(crate) fn cells(item: &str, width: usize, depth: usize) -> Vec<(usize, usize)> {
        slots(item, depth, width as u64)
            .enumerate()
            .map(|(row, col)| (row, col as usize))
            .collect()
    }

    pub fn incr_by(&mut self, item: &str, increment: u64) {
        for (row, col) in Self::cells(item, self.width, self.depth) {
            let cell = &mut self.counters[row * self.width + col];
            *cell = cell.saturating_add(increment);
        }
    }

    pub fn query(&self, item: &str) -> u64 {
        Self::cells(item, self.width, self.depth)
            .into_iter()
            .map(|(row, col)| self.counters[row * self.width + col])
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_undercounts() {
        let mut cms = CountMinSketch::new(20, 4);
        for i in 0..200 {
            cms.incr_by(&format!("t{}", i % 50), 1);
        }
        for i in 0..50 {
            assert!(cms.query(&format!("t{i}")) >= 4);
        }
    }

    #[test]
    fn exact_when_sparse() {
        let mut cms = CountMinSketch::new(3000, 10);
        cms.incr_by("NATO", 3);
        cms.incr_by("Climate Policy", 1);
        assert_eq!(cms.query("NATO"), 3);
        assert_eq!(cms.query("Climate Policy"), 1);
        assert_eq!(cms.query("unseen"), 0);
    }
}
