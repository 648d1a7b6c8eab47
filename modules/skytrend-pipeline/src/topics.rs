use std::sync::Arc;

use ai_client::Message;
use anyhow::Result;
use skytrend_common::prompts::{existing_topics_message, post_message};
use skytrend_common::text::parse_topic_list;
use skytrend_common::TopicDomain;
use skytrend_store::Sketches;
use tracing::{debug, warn};

use crate::traits::ChatModel;

/// Set holding every topic ever extracted.
pub const TOPIC_UNIVERSE: &str = "topics";

/// LLM topic extraction primed with the known topic vocabulary.
#[derive(Clone)]
pub struct TopicExtractor {
    chat: Arc<dyn ChatModel>,
    sketches: Arc<dyn Sketches>,
    domain: TopicDomain,
}

impl TopicExtractor {
    pub fn new(chat: Arc<dyn ChatModel>, sketches: Arc<dyn Sketches>, domain: TopicDomain) -> Self {
        Self { chat, sketches, domain }
    }

    /// Topics for `text`. A failed LLM call yields an empty list; a failed
    /// read of the topic universe is returned as an error.
    pub async fn extract(&self, text: &str) -> Result<Vec<String>> {
        let existing = self.sketches.set_members(TOPIC_UNIVERSE).await?;

        let messages = vec![
            Message::system(self.domain.system_prompt()),
            Message::user(existing_topics_message(&existing)),
            Message::user(post_message(text)),
        ];

        match self.chat.complete(messages).await {
            Ok(reply) => {
                let topics = parse_topic_list(&reply);
                debug!(count = topics.len(), "Topics extracted");
                Ok(topics)
            }
            Err(e) => {
                warn!(error = %e, "Topic extraction failed, using no topics");
                Ok(Vec::new())
            }
        }
    }

    /// Union new topics into the universe.
    pub async fn remember(&self, topics: &[String]) -> Result<()> {
        self.sketches.set_add(TOPIC_UNIVERSE, topics).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChat;
    use skytrend_store::MemorySketches;

    #[tokio::test]
    async fn sends_three_messages_and_parses_reply() {
        let chat = Arc::new(ScriptedChat::new().on_post(
            "I love LangChain and OpenAI APIs.",
            "\"LangChain, OpenAI, Prompt Engineering\"",
        ));
        let sketches = Arc::new(MemorySketches::new());
        sketches.set_add(TOPIC_UNIVERSE, &["OpenAI".into()]).await.unwrap();

        let extractor = TopicExtractor::new(chat.clone(), sketches, TopicDomain::Ai);
        let topics = extractor.extract("I love LangChain and OpenAI APIs.").await.unwrap();
        assert_eq!(topics, vec!["LangChain", "OpenAI", "Prompt Engineering"]);

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 3);
        assert_eq!(calls[0][1].content, "Existing topics: OpenAI");
        assert_eq!(calls[0][2].content, "Post: I love LangChain and OpenAI APIs.");
    }

    #[tokio::test]
    async fn llm_failure_yields_no_topics() {
        let extractor = TopicExtractor::new(
            Arc::new(ScriptedChat::failing()),
            Arc::new(MemorySketches::new()),
            TopicDomain::Politics,
        );
        assert!(extractor.extract("anything").await.unwrap().is_empty());
    }
}
