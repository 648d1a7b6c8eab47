// Model boundaries for the pipeline and the bot.
//
// TextEmbedder: text → fixed-dimension vector (documents 384-d, queries 3072-d).
// ChatModel: message list → completion text.
// NliModel: (premise, hypothesis) → logits over entailment/neutral/contradiction.
//
// Production code wires these to ai_client::OpenAi and an HTTP inference
// endpoint; tests use the mocks in `testing`.

use std::time::Duration;

use ai_client::{EmbedAgent, Message, OpenAi};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TextEmbedder
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;
}

/// OpenAI embeddings shortened to a fixed dimension.
pub struct OpenAiEmbedder {
    client: OpenAi,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: &OpenAi, model: &str, dimensions: usize) -> Self {
        let client = client
            .clone()
            .with_embedding_model(model)
            .with_embedding_dimensions(dimensions);
        Self { client, dimensions }
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.client.embed(text.to_string()).await?;
        if vector.len() != self.dimensions {
            anyhow::bail!(
                "embedding model returned {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            );
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// ChatModel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;
}

#[async_trait]
impl ChatModel for OpenAi {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        self.chat(messages).await
    }
}

// ---------------------------------------------------------------------------
// NliModel
// ---------------------------------------------------------------------------

/// Logit index of each NLI class.
pub const ENTAILMENT: usize = 0;
pub const NEUTRAL: usize = 1;
pub const CONTRADICTION: usize = 2;

#[async_trait]
pub trait NliModel: Send + Sync {
    /// Raw logits ordered `[entailment, neutral, contradiction]`.
    async fn logits(&self, premise: &str, hypothesis: &str) -> Result<[f32; 3]>;
}

#[derive(Serialize)]
struct NliRequest<'a> {
    premise: &'a str,
    hypothesis: &'a str,
}

#[derive(Deserialize)]
struct NliResponse {
    logits: Vec<f32>,
}

/// NLI model served over HTTP: `POST {url}` with `{premise, hypothesis}`,
/// answered by `{logits: [e, n, c]}`.
pub struct HttpNliModel {
    url: String,
    http: reqwest::Client,
}

impl HttpNliModel {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { url: url.into(), http })
    }
}

#[async_trait]
impl NliModel for HttpNliModel {
    async fn logits(&self, premise: &str, hypothesis: &str) -> Result<[f32; 3]> {
        let response = self
            .http
            .post(&self.url)
            .json(&NliRequest { premise, hypothesis })
            .send()
            .await
            .context("NLI request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("NLI endpoint returned {status}: {body}");
        }

        let body: NliResponse = response.json().await.context("Malformed NLI response")?;
        let logits: [f32; 3] = body
            .logits
            .try_into()
            .map_err(|v: Vec<f32>| anyhow::anyhow!("expected 3 NLI logits, got {}", v.len()))?;
        Ok(logits)
    }
}
