use std::collections::BTreeSet;
use std::sync::Arc;

use ai_client::Message;
use anyhow::Result;
use skytrend_common::prompts::{answer_message, ANSWER_PROMPT};
use skytrend_common::Route;
use skytrend_pipeline::ChatModel;
use tracing::info;

use crate::router::SemanticRouter;
use crate::summarizer::Summarizer;
use crate::trending::TrendingAnalyzer;

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub routes: BTreeSet<Route>,
    pub text: String,
}

/// Routes a query, gathers enrichment per route, asks the LLM.
#[derive(Clone)]
pub struct Responder {
    router: SemanticRouter,
    trending: TrendingAnalyzer,
    summarizer: Summarizer,
    chat: Arc<dyn ChatModel>,
}

impl Responder {
    pub fn new(
        router: SemanticRouter,
        trending: TrendingAnalyzer,
        summarizer: Summarizer,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            router,
            trending,
            summarizer,
            chat,
        }
    }

    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let routes = self.router.route(query).await?;

        let trending = if routes.contains(&Route::TrendingTopics) {
            Some(self.trending.trending_topics().await?)
        } else {
            None
        };
        let related = if routes.contains(&Route::Summarization) {
            Some(self.summarizer.related_posts(query).await?.texts)
        } else {
            None
        };

        let messages = vec![
            Message::system(ANSWER_PROMPT),
            Message::user(answer_message(query, trending.as_deref(), related.as_deref())),
        ];
        let text = self.chat.complete(messages).await?.trim().to_string();

        info!(
            routes = ?routes,
            trending = trending.as_ref().map_or(0, Vec::len),
            related = related.as_ref().map_or(0, Vec::len),
            "Answer composed"
        );
        Ok(Answer { routes, text })
    }
}
