use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SkytrendError;

/// Which topic vocabulary the extractor is primed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicDomain {
    #[default]
    Ai,
    Politics,
}

impl TopicDomain {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            TopicDomain::Ai => TOPIC_PROMPT_AI,
            TopicDomain::Politics => TOPIC_PROMPT_POLITICS,
        }
    }
}

impl FromStr for TopicDomain {
    type Err = SkytrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ai" => Ok(TopicDomain::Ai),
            "politics" => Ok(TopicDomain::Politics),
            other => Err(SkytrendError::Config(format!("unknown topic domain '{other}'"))),
        }
    }
}

// =============================================================================
// Topic extraction
// =============================================================================

pub const TOPIC_PROMPT_AI: &str = r#"You are a topic classifier specialized in artificial intelligence. Given a post, extract only AI-related topics—both explicitly mentioned and reasonably implied.

If a post mentions an AI model, framework, technique, company, use case, research area, or tool, infer related AI topics or domains.

For example, if the post mentions "LangChain and OpenAI APIs", you may infer topics like "Prompt Engineering", "Retrieval-Augmented Generation", and "AI Tooling".

Avoid generic terms like "tech", "news", or "cool project".

Only return relevant AI topics.

Also avoid overly narrow items such as specific model version numbers or isolated API methods.

If the topic or a very similar one is already in the provided list of existing topics, use the one from the list. Otherwise, feel free to create a new one.

If the content is not related to AI at all, return an empty string.

If the content still mentions AI, try to imply topics anyway.

Format your response as comma separated values (ALWAYS, I MEAN IT):
"topic1, topic2, topic3"

⸻

Examples:

Post:
Just finished a tutorial on LangChain using OpenAI’s API. Super fun.
Output:
"LangChain, OpenAI, Prompt Engineering, AI Tooling"

Post:
Trying to run Mistral locally with Ollama. Inference seems fast!
Output:
"Mistral, Local Inference, Model Deployment, Open-Source LLMs"

Post:
Google’s new image model can generate photos from text prompts.
Output:
"Text-to-Image, Generative Models, Google AI, Diffusion Models"

Post:
Tried the new Zelda game over the weekend. It’s amazing!
Output:
""
"#;

pub const TOPIC_PROMPT_POLITICS: &str = r#"You are a topic classifier specialized in politics. Given a post, extract only politics-related topics—both explicitly mentioned and reasonably implied.

If a post mentions a political figure, event, party, law, or movement, infer related political topics or domains.

For example, if the post mentions “Green New Deal”, you may infer topics like “climate policy”, “progressive politics”, and “US Congress”.

Avoid generic terms like “news”, “statement”, or “speech”.
Only return relevant political topics.

Also avoid overly narrow items such as specific bill numbers or individual quotes.

If the topic or a very similar is already in the provided list of existing topics, use the one from the list, otherwise, feel free to create a new one.

If the content is not political, return an empty string.

Format your response as comma separated values (ALWAYS, I MEAN IT):
"topic1, topic2, topic3"

Examples:

Post:
Climate change policy needs serious bipartisan commitment.
Output:
“Climate Policy, Bipartisanship, Environmental Politics”
⸻
Post:
Macron’s recent comments on NATO expansion are causing waves.
Output:
“Emmanuel Macron, NATO, Foreign Policy, European Politics”
⸻
Post:
Just watched a debate on universal basic income — fascinating stuff!
Output:
“Universal Basic Income, Economic Policy, Social Welfare”
⸻
Post:
The Supreme Court decision today is a major turning point.
Output:
“Supreme Court, Judicial System, Constitutional Law”
⸻
Post:
Alexandria Ocasio-Cortez is pushing for stronger climate legislation.
Output:
“Alexandria Ocasio-Cortez, Climate Policy, Progressive Politics, US Congress”
-
Post:
The Nintendo Switch is a cool video game console!
Output:
""
"#;

pub fn existing_topics_message(existing: &[String]) -> String {
    format!("Existing topics: {}", existing.join(", "))
}

pub fn post_message(text: &str) -> String {
    format!("Post: {text}")
}

// =============================================================================
// Bot answers
// =============================================================================

pub const ANSWER_PROMPT: &str = r#"You are a bot on a social network that answers questions about what people are posting.

You receive the user's question together with enrichment data gathered for it:
- TRENDING TOPICS: the most mentioned topics of the current hour, most frequent first.
- RELATED POSTS: the text of recent posts about the topics the user asked about.

Answer using only the enrichment data. Do not invent topics or posts.
If the enrichment data is empty, say briefly that you have nothing on that yet.
Write plain text without hashtags or markdown.
Your whole answer MUST be shorter than 300 characters."#;

/// User message for the answer call. Sections with no data are omitted.
pub fn answer_message(query: &str, trending: Option<&[String]>, related: Option<&[String]>) -> String {
    let mut msg = String::new();
    if let Some(topics) = trending {
        msg.push_str("TRENDING TOPICS:\n");
        msg.push_str(&topics.join(", "));
        msg.push_str("\n\n");
    }
    if let Some(posts) = related {
        msg.push_str("RELATED POSTS:\n");
        for post in posts {
            msg.push_str("- ");
            msg.push_str(post);
            msg.push('\n');
        }
        msg.push('\n');
    }
    msg.push_str("QUESTION:\n");
    msg.push_str(query);
    msg
}
