//! Semantic router: nearest labelled reference per clause, thresholded per
//! route.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use skytrend_common::text::split_clauses;
use skytrend_common::{Route, RoutingReference};
use skytrend_pipeline::TextEmbedder;
use skytrend_store::{IndexSchema, RoutingStore};
use tracing::{debug, info};
use uuid::Uuid;

pub const TRENDING_MAX_DISTANCE: f64 = 0.2;
pub const SUMMARIZATION_MAX_DISTANCE: f64 = 0.55;

pub const TRENDING_REFERENCES: &[&str] = &[
    "What are the most mentioned topics?",
    "What's trending right now?",
    "What’s hot in the network",
    "Top topics?",
    "What are the most discussed topics?",
    "What are the most popular topics?",
    "What are the most talked about topics?",
    "What are the most mentioned topics in the AI community?",
];

pub const SUMMARIZATION_REFERENCES: &[&str] = &[
    "What are people saying about {topics}?",
    "What’s the buzz around {topics}?",
    "Any chatter about {topics}?",
    "What are folks talking about regarding {topics}?",
    "What’s being said about {topics} lately?",
    "What have people been posting about {topics}?",
    "What's trending in conversations about {topics}?",
    "What’s the latest talk on {topics}?",
    "Any recent posts about {topics}?",
    "What's the sentiment around {topics}?",
    "What are people saying about {topic1} and {topic2}?",
    "What are folks talking about when it comes to {topic1}, {topic2}, or both?",
    "What’s being said about {topic1}, {topic2}, and others?",
    "Is there any discussion around {topic1} and {topic2}?",
    "How are people reacting to both {topic1} and {topic2}?",
    "What’s the conversation like around {topic1}, {topic2}, or related topics?",
    "Are {topic1} and {topic2} being discussed together?",
    "Any posts comparing {topic1} and {topic2}?",
    "What's trending when it comes to {topic1} and {topic2}?",
    "What are people saying about the relationship between {topic1} and {topic2}?",
    "What’s the latest discussion on {topic1} and {topic2}?",
];

/// A reference phrase before it is embedded.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSeed {
    pub text: &'static str,
    pub route: Route,
    pub max_distance: f64,
}

/// Built-in reference set for both routes.
pub fn default_references() -> Vec<ReferenceSeed> {
    let trending = TRENDING_REFERENCES.iter().map(|&text| ReferenceSeed {
        text,
        route: Route::TrendingTopics,
        max_distance: TRENDING_MAX_DISTANCE,
    });
    let summarization = SUMMARIZATION_REFERENCES.iter().map(|&text| ReferenceSeed {
        text,
        route: Route::Summarization,
        max_distance: SUMMARIZATION_MAX_DISTANCE,
    });
    trending.chain(summarization).collect()
}

#[derive(Clone)]
pub struct SemanticRouter {
    store: Arc<dyn RoutingStore>,
    embedder: Arc<dyn TextEmbedder>,
}

impl SemanticRouter {
    pub fn new(store: Arc<dyn RoutingStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { store, embedder }
    }

    /// Register the routing index and seed it when empty. Returns the number
    /// of references inserted.
    pub async fn prepare(&self, seeds: &[ReferenceSeed]) -> Result<usize> {
        self.store
            .register_schema(&IndexSchema::routing(self.embedder.dimensions()))
            .await?;

        if self.store.count().await? > 0 {
            debug!("Routing references already present");
            return Ok(0);
        }

        for seed in seeds {
            let reference = RoutingReference {
                id: Uuid::new_v4(),
                text: seed.text.to_string(),
                route: seed.route,
                max_distance: seed.max_distance,
                text_embedding: self.embedder.embed(seed.text).await?,
            };
            self.store.insert(&reference).await?;
        }
        info!(count = seeds.len(), "Routing references seeded");
        Ok(seeds.len())
    }

    /// Routes for the clause: every route whose nearest reference is within
    /// that reference's own distance.
    pub async fn route_clause(&self, clause: &str) -> Result<BTreeSet<Route>> {
        let vector = self.embedder.embed(clause).await?;
        let nearest = self.store.nearest_per_route(&vector).await?;

        Ok(nearest
            .into_iter()
            .filter(|(reference, distance)| *distance <= reference.max_distance)
            .inspect(|(reference, distance)| {
                debug!(clause, route = %reference.route, distance, reference = %reference.text, "Clause matched");
            })
            .map(|(reference, _)| reference.route)
            .collect())
    }

    /// Union of routes over every clause of the query.
    pub async fn route(&self, query: &str) -> Result<BTreeSet<Route>> {
        let mut routes = BTreeSet::new();
        for clause in split_clauses(query) {
            routes.extend(self.route_clause(&clause).await?);
        }
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skytrend_pipeline::testing::{axis_vector, FixedEmbedder};
    use skytrend_store::MemoryRoutingStore;

    const DIMS: usize = 256;

    fn embedder() -> FixedEmbedder {
        let mut e = FixedEmbedder::new(DIMS);
        for text in TRENDING_REFERENCES {
            e = e.on_text(text, axis_vector(DIMS, 0, 0.0));
        }
        for text in SUMMARIZATION_REFERENCES {
            e = e.on_text(text, axis_vector(DIMS, 10, 0.0));
        }
        e
    }

    #[tokio::test]
    async fn seeds_only_once() {
        let store = Arc::new(MemoryRoutingStore::new());
        let router = SemanticRouter::new(store.clone(), Arc::new(embedder()));

        let seeded = router.prepare(&default_references()).await.unwrap();
        assert_eq!(seeded, TRENDING_REFERENCES.len() + SUMMARIZATION_REFERENCES.len());
        assert_eq!(router.prepare(&default_references()).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap() as usize, seeded);
    }

    #[tokio::test]
    async fn threshold_applies_per_route() {
        // Distance of a tilt t from its axis is 1 - 1/sqrt(1 + t^2):
        // 0.5 → 0.106, 0.8 → 0.219, 2.0 → 0.553.
        let embedder = embedder()
            .on_text("near trending", axis_vector(DIMS, 0, 0.5))
            .on_text("drifted trending", axis_vector(DIMS, 0, 0.8))
            .on_text("close summary", axis_vector(DIMS, 10, 0.5))
            .on_text("far summary", axis_vector(DIMS, 10, 2.0));
        let router = SemanticRouter::new(Arc::new(MemoryRoutingStore::new()), Arc::new(embedder));
        router.prepare(&default_references()).await.unwrap();

        assert_eq!(
            router.route_clause("near trending").await.unwrap(),
            BTreeSet::from([Route::TrendingTopics])
        );
        assert!(router.route_clause("drifted trending").await.unwrap().is_empty());
        assert_eq!(
            router.route_clause("close summary").await.unwrap(),
            BTreeSet::from([Route::Summarization])
        );
        assert!(router.route_clause("far summary").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrelated_clause_has_no_route() {
        let router = SemanticRouter::new(Arc::new(MemoryRoutingStore::new()), Arc::new(embedder()));
        router.prepare(&default_references()).await.unwrap();
        assert!(router.route("Tell me a joke about cats.").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_query_has_no_route() {
        let router = SemanticRouter::new(Arc::new(MemoryRoutingStore::new()), Arc::new(embedder()));
        router.prepare(&default_references()).await.unwrap();
        assert!(router.route(" ?! ").await.unwrap().is_empty());
    }
}
