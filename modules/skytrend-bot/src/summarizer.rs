use std::sync::Arc;

use anyhow::Result;
use skytrend_pipeline::TopicExtractor;
use skytrend_store::DocumentStore;
use tracing::debug;

/// Topics the query asks about and the posts filed under them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedPosts {
    pub topics: Vec<String>,
    pub texts: Vec<String>,
}

/// Gathers posts for the summarization route.
#[derive(Clone)]
pub struct Summarizer {
    extractor: TopicExtractor,
    documents: Arc<dyn DocumentStore>,
}

impl Summarizer {
    pub fn new(extractor: TopicExtractor, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            extractor,
            documents,
        }
    }

    /// Extract topics from the query and fetch every document sharing one.
    /// Query topics are not added to the topic universe.
    pub async fn related_posts(&self, query: &str) -> Result<RelatedPosts> {
        let topics = self.extractor.extract(query).await?;
        if topics.is_empty() {
            return Ok(RelatedPosts::default());
        }

        let docs = self.documents.find_by_topic_intersection(&topics).await?;
        debug!(topics = ?topics, documents = docs.len(), "Related posts fetched");
        Ok(RelatedPosts {
            topics,
            texts: docs.into_iter().map(|d| d.post.text).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skytrend_common::{FilteredDocument, TopicDomain};
    use skytrend_pipeline::testing::{post, ScriptedChat};
    use skytrend_pipeline::TOPIC_UNIVERSE;
    use skytrend_store::{MemoryDocumentStore, MemorySketches, Sketches};

    async fn doc(store: &MemoryDocumentStore, rkey: &str, text: &str, topics: &[&str]) {
        let mut d = FilteredDocument::from_event(post("d1", rkey, text));
        d.topics = topics.iter().map(|t| t.to_string()).collect();
        store.upsert(&d).await.unwrap();
    }

    #[tokio::test]
    async fn fetches_documents_for_query_topics() {
        let documents = Arc::new(MemoryDocumentStore::new());
        doc(&documents, "a", "GPT-5 rumours again", &["OpenAI"]).await;
        doc(&documents, "b", "Agents with LangChain", &["LangChain"]).await;
        doc(&documents, "c", "Senate vote tonight", &["Elections"]).await;

        let sketches = Arc::new(MemorySketches::new());
        let chat = Arc::new(
            ScriptedChat::new().on_post("What are people saying about OpenAI and LangChain", "\"OpenAI, LangChain\""),
        );
        let summarizer = Summarizer::new(
            TopicExtractor::new(chat, sketches.clone(), TopicDomain::Ai),
            documents,
        );

        let related = summarizer
            .related_posts("What are people saying about OpenAI and LangChain")
            .await
            .unwrap();
        assert_eq!(related.topics, vec!["OpenAI", "LangChain"]);
        let mut texts = related.texts;
        texts.sort();
        assert_eq!(texts, vec!["Agents with LangChain", "GPT-5 rumours again"]);

        assert!(sketches.set_members(TOPIC_UNIVERSE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_topics_means_no_posts() {
        let summarizer = Summarizer::new(
            TopicExtractor::new(
                Arc::new(ScriptedChat::new()),
                Arc::new(MemorySketches::new()),
                TopicDomain::Ai,
            ),
            Arc::new(MemoryDocumentStore::new()),
        );
        assert_eq!(summarizer.related_posts("hello").await.unwrap(), RelatedPosts::default());
    }
}
