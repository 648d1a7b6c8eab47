use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SkytrendError;

/// Flat string-keyed projection carried on the durable logs.
pub type StreamFields = BTreeMap<String, String>;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";

// --- Operation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SkytrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(SkytrendError::Parse(format!("unknown operation '{other}'"))),
        }
    }
}

// --- PostEvent ---

/// Canonical record produced by ingest and consumed by every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEvent {
    pub uri: String,
    pub did: String,
    pub rkey: String,
    pub text: String,
    pub time_us: i64,
    pub operation: Operation,
    pub parent_uri: Option<String>,
    pub root_uri: Option<String>,
    pub langs: Vec<String>,
    pub created_at: Option<String>,
}

impl PostEvent {
    /// `at://<did>/app.bsky.feed.post/<rkey>`
    pub fn post_uri(did: &str, rkey: &str) -> String {
        format!("at://{did}/{POST_COLLECTION}/{rkey}")
    }

    /// Blank text or a delete never propagates past the filter stage.
    pub fn is_trivial(&self) -> bool {
        self.text.trim().is_empty() || self.operation == Operation::Delete
    }

    pub fn to_fields(&self) -> StreamFields {
        let mut fields = StreamFields::new();
        fields.insert("uri".into(), self.uri.clone());
        fields.insert("did".into(), self.did.clone());
        fields.insert("rkey".into(), self.rkey.clone());
        fields.insert("text".into(), self.text.clone());
        fields.insert("timeUs".into(), self.time_us.to_string());
        fields.insert("operation".into(), self.operation.as_str().into());
        fields.insert(
            "parentUri".into(),
            self.parent_uri.clone().unwrap_or_default(),
        );
        fields.insert("rootUri".into(), self.root_uri.clone().unwrap_or_default());
        fields.insert("langs".into(), encode_langs(&self.langs));
        fields.insert(
            "createdAt".into(),
            self.created_at.clone().unwrap_or_default(),
        );
        fields
    }

    pub fn from_fields(fields: &StreamFields) -> Result<Self, SkytrendError> {
        let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let optional = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

        let uri = get("uri");
        if uri.is_empty() {
            return Err(SkytrendError::Parse("entry has no uri".into()));
        }

        let time_us = match fields.get("timeUs").map(String::as_str) {
            None | Some("") => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| SkytrendError::Parse(format!("bad timeUs '{raw}' for {uri}")))?,
        };

        Ok(Self {
            operation: get("operation").parse()?,
            did: get("did"),
            rkey: get("rkey"),
            text: get("text"),
            time_us,
            parent_uri: optional("parentUri"),
            root_uri: optional("rootUri"),
            langs: decode_langs(&get("langs")),
            created_at: optional("createdAt"),
            uri,
        })
    }
}

/// `["en", "fr"]` → `[en, fr]`
pub fn encode_langs(langs: &[String]) -> String {
    format!("[{}]", langs.join(", "))
}

/// `[en, fr]` → `["en", "fr"]`; `[]` and blanks decode to nothing.
pub fn decode_langs(raw: &str) -> Vec<String> {
    raw.replace(['[', ']'], "")
        .split(", ")
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// --- FilteredDocument ---

/// Persisted post that passed the filter stage. `id == post.uri` always.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredDocument {
    pub id: String,
    pub post: PostEvent,
    pub text_embedding: Option<Vec<f32>>,
    pub topics: Vec<String>,
}

impl FilteredDocument {
    pub fn from_event(post: PostEvent) -> Self {
        Self {
            id: post.uri.clone(),
            post,
            text_embedding: None,
            topics: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.post.text
    }
}

// --- Routes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    TrendingTopics,
    Summarization,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::TrendingTopics => "trending_topics",
            Route::Summarization => "summarization",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = SkytrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trending_topics" => Ok(Route::TrendingTopics),
            "summarization" => Ok(Route::Summarization),
            other => Err(SkytrendError::Parse(format!("unknown route '{other}'"))),
        }
    }
}

/// Labelled example used by the semantic router. `max_distance` is the
/// largest cosine distance still accepted as a match for `route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingReference {
    pub id: Uuid,
    pub text: String,
    pub route: Route,
    pub max_distance: f64,
    pub text_embedding: Vec<f32>,
}

// --- Semantic cache ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub post: String,
    pub answer: String,
    pub post_embedding: Vec<f32>,
}

impl CacheEntry {
    /// Identical post text maps to the same id, so re-inserts overwrite.
    pub fn new(post: impl Into<String>, answer: impl Into<String>, post_embedding: Vec<f32>) -> Self {
        let post = post.into();
        Self {
            id: cache_key(&post),
            post,
            answer: answer.into(),
            post_embedding,
        }
    }
}

pub fn cache_key(post: &str) -> String {
    hex::encode(Sha256::digest(post.trim().as_bytes()))
}

// --- Vector math ---

/// Cosine similarity for f32 embedding vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// Cosine distance in `[0, 2]`, the metric every vector index here uses.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Scale to unit length. Zero vectors come back unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> PostEvent {
        PostEvent {
            uri: PostEvent::post_uri("d1", "k1"),
            did: "d1".into(),
            rkey: "k1".into(),
            text: "I love LangChain and OpenAI APIs.".into(),
            time_us: 1_700_000_000_000_000,
            operation: Operation::Create,
            parent_uri: None,
            root_uri: Some("at://d0/app.bsky.feed.post/r".into()),
            langs: vec!["en".into(), "fr".into()],
            created_at: None,
        }
    }

    #[test]
    fn post_uri_format() {
        assert_eq!(
            PostEvent::post_uri("did:plc:abc", "3k"),
            "at://did:plc:abc/app.bsky.feed.post/3k"
        );
    }

    #[test]
    fn fields_use_wire_names_and_bracketed_langs() {
        let fields = sample_event().to_fields();
        assert_eq!(fields["langs"], "[en, fr]");
        assert_eq!(fields["timeUs"], "1700000000000000");
        assert_eq!(fields["parentUri"], "");
        assert_eq!(fields["operation"], "create");
    }

    #[test]
    fn from_fields_restores_optional_fields() {
        let event = sample_event();
        let restored = PostEvent::from_fields(&event.to_fields()).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn missing_uri_is_a_parse_error() {
        let mut fields = sample_event().to_fields();
        fields.remove("uri");
        assert!(matches!(
            PostEvent::from_fields(&fields),
            Err(SkytrendError::Parse(_))
        ));
    }

    #[test]
    fn decode_langs_handles_empty_forms() {
        assert!(decode_langs("[]").is_empty());
        assert!(decode_langs("").is_empty());
        assert_eq!(decode_langs("[ja]"), vec!["ja".to_string()]);
    }

    #[test]
    fn trivial_posts() {
        let mut event = sample_event();
        assert!(!event.is_trivial());
        event.text = "   ".into();
        assert!(event.is_trivial());
        event.text = "hello".into();
        event.operation = Operation::Delete;
        assert!(event.is_trivial());
    }

    #[test]
    fn document_id_is_uri() {
        let doc = FilteredDocument::from_event(sample_event());
        assert_eq!(doc.id, doc.post.uri);
    }

    #[test]
    fn route_round_trips_through_str() {
        for route in [Route::TrendingTopics, Route::Summarization] {
            assert_eq!(route.as_str().parse::<Route>().unwrap(), route);
        }
        assert!("weather".parse::<Route>().is_err());
    }

    #[test]
    fn cache_key_ignores_surrounding_whitespace() {
        assert_eq!(cache_key(" hi "), cache_key("hi"));
        assert_ne!(cache_key("hi"), cache_key("hello"));
    }

    #[test]
    fn cosine_distance_bounds() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_distance(&a, &a).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_yields_unit_vectors() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
