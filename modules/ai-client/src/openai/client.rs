use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::types::*;
use crate::error::AiError;

pub(crate) const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Pause before the single retry of a transient failure.
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub(crate) struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            http,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap, AiError> {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                    .map_err(|e| AiError::Config(format!("invalid API key header: {e}")))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// POST with one retry on transient failures.
    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AiError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        match self.post_once(path, body).await {
            Err(e) if e.is_transient() => {
                warn!(path, error = %e, "OpenAI request failed, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.post_once(path, body).await
            }
            other => other,
        }
    }

    async fn post_once<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, AiError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        debug!(model = %request.model, messages = request.messages.len(), "OpenAI chat request");
        self.post_json("/chat/completions", request).await
    }

    pub async fn chat_text(&self, request: &ChatRequest) -> Result<String, AiError> {
        let response = self.chat(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::EmptyResponse(format!("no choices from {}", request.model)))
    }

    pub async fn embed(
        &self,
        model: &str,
        dimensions: Option<usize>,
        text: &str,
    ) -> Result<Vec<f32>, AiError> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: text.to_string(),
            dimensions,
        };

        let response: EmbeddingResponse = self.post_json("/embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AiError::EmptyResponse("no embedding in response".into()))
    }
}
