use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use skytrend_common::text::topk_key;
use skytrend_pipeline::Clock;
use skytrend_store::Sketches;

/// Reads the current hour's Top-K.
#[derive(Clone)]
pub struct TrendingAnalyzer {
    sketches: Arc<dyn Sketches>,
    clock: Clock,
}

impl TrendingAnalyzer {
    pub fn new(sketches: Arc<dyn Sketches>) -> Self {
        Self {
            sketches,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Topics of the current hour, most frequent first. Empty when nothing
    /// was counted yet this hour.
    pub async fn trending_topics(&self) -> Result<Vec<String>> {
        let key = topk_key((self.clock)());
        let mut top = self.sketches.topk_list(&key).await?;
        top.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(top.into_iter().map(|(topic, _)| topic).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skytrend_store::{MemorySketches, TopKParams};

    #[tokio::test]
    async fn reads_only_the_current_hour() {
        let sketches = Arc::new(MemorySketches::with_topk_seed(1));
        let params = TopKParams::default();
        let now = Utc.with_ymd_and_hms(2024, 11, 14, 22, 30, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 11, 14, 21, 59, 0).unwrap();

        sketches.topk_reserve(&topk_key(now), params).await.unwrap();
        sketches
            .topk_incr_by(&topk_key(now), &[("OpenAI".into(), 3), ("LangChain".into(), 5)])
            .await
            .unwrap();
        sketches.topk_reserve(&topk_key(earlier), params).await.unwrap();
        sketches
            .topk_incr_by(&topk_key(earlier), &[("Elections".into(), 9)])
            .await
            .unwrap();

        let analyzer = TrendingAnalyzer::new(sketches).with_clock(Arc::new(move || now));
        assert_eq!(analyzer.trending_topics().await.unwrap(), vec!["LangChain", "OpenAI"]);
    }

    #[tokio::test]
    async fn empty_hour_has_no_topics() {
        let analyzer = TrendingAnalyzer::new(Arc::new(MemorySketches::new()));
        assert!(analyzer.trending_topics().await.unwrap().is_empty());
    }
}
