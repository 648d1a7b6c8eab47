// Test mocks for the pipeline model boundaries.
//
// - FixedEmbedder (TextEmbedder): registered text→vector, hash fallback
// - ScriptedChat (ChatModel): canned replies keyed by the last user message
// - FixedClassifier (TextClassifier): constant score, per-text overrides
//
// Plus helpers for building firehose messages and posts.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;

use ai_client::Message;
use anyhow::{bail, Result};
use async_trait::async_trait;
use skytrend_common::prompts::post_message;
use skytrend_common::{Operation, PostEvent};

use crate::classifier::TextClassifier;
use crate::traits::{ChatModel, TextEmbedder};

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder. Registered texts get exact vectors; anything
/// else gets a pseudo-random unit vector derived from its hash, which is
/// nearly orthogonal to everything else in high dimensions.
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
    calls: Mutex<Vec<String>>,
}

impl FixedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimensions,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Texts embedded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vec = vec![0.0f32; self.dimensions];
        for v in vec.iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        skytrend_common::normalize(vec)
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_vector(text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Unit vector along `axis`, optionally tilted towards `axis + 1` by `tilt`.
/// Handy for placing texts at a known cosine distance from each other.
pub fn axis_vector(dimensions: usize, axis: usize, tilt: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; dimensions];
    v[axis] = 1.0;
    if tilt != 0.0 {
        v[(axis + 1) % dimensions] = tilt;
    }
    skytrend_common::normalize(v)
}

// ---------------------------------------------------------------------------
// ScriptedChat
// ---------------------------------------------------------------------------

/// Chat model with canned replies. The last user message picks the reply:
/// exact `Post: <text>` matches first, then prefixes, then the default.
pub struct ScriptedChat {
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
    default_reply: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            prefixes: Vec::new(),
            default_reply: Some(String::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self {
            default_reply: None,
            ..Self::new()
        }
    }

    /// Reply for the topic prompt of a given post.
    pub fn on_post(mut self, post: &str, reply: &str) -> Self {
        self.exact.insert(post_message(post), reply.to_string());
        self
    }

    pub fn on_prefix(mut self, prefix: &str, reply: &str) -> Self {
        self.prefixes.push((prefix.to_string(), reply.to_string()));
        self
    }

    pub fn with_default(mut self, reply: &str) -> Self {
        self.default_reply = Some(reply.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().unwrap().push(messages);

        if let Some(reply) = self.exact.get(&last) {
            return Ok(reply.clone());
        }
        if let Some((_, reply)) = self.prefixes.iter().find(|(p, _)| last.starts_with(p.as_str())) {
            return Ok(reply.clone());
        }
        match &self.default_reply {
            Some(reply) => Ok(reply.clone()),
            None => bail!("ScriptedChat: scripted failure"),
        }
    }
}

// ---------------------------------------------------------------------------
// FixedClassifier
// ---------------------------------------------------------------------------

/// Scores every label with a constant, unless the text has an override.
pub struct FixedClassifier {
    score: f64,
    overrides: HashMap<String, f64>,
}

impl FixedClassifier {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            overrides: HashMap::new(),
        }
    }

    pub fn on_text(mut self, text: &str, score: f64) -> Self {
        self.overrides.insert(text.to_string(), score);
        self
    }
}

#[async_trait]
impl TextClassifier for FixedClassifier {
    async fn classify(
        &self,
        text: &str,
        labels: &[String],
        _multi_label: bool,
    ) -> Result<Vec<(String, f64)>> {
        let score = self.overrides.get(text).copied().unwrap_or(self.score);
        Ok(labels.iter().map(|l| (l.clone(), score)).collect())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A Jetstream commit message for a post.
pub fn jetstream_commit(did: &str, rkey: &str, operation: &str, text: &str) -> String {
    serde_json::json!({
        "did": did,
        "time_us": 1_700_000_000_000_000i64,
        "kind": "commit",
        "commit": {
            "rev": "r",
            "operation": operation,
            "collection": "app.bsky.feed.post",
            "rkey": rkey,
            "record": { "text": text },
        }
    })
    .to_string()
}

pub fn post(did: &str, rkey: &str, text: &str) -> PostEvent {
    PostEvent {
        uri: PostEvent::post_uri(did, rkey),
        did: did.to_string(),
        rkey: rkey.to_string(),
        text: text.to_string(),
        time_us: 1_700_000_000_000_000,
        operation: Operation::Create,
        parent_uri: None,
        root_uri: None,
        langs: vec!["en".to_string()],
        created_at: None,
    }
}
