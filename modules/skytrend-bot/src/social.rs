//! Bluesky XRPC client: session, mention search, reply posting.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skytrend_common::POST_COLLECTION;
use thiserror::Error;
use tracing::debug;

/// Page size requested from `searchPosts`.
pub const SEARCH_PAGE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum SocialError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SocialError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SocialError::Parse(err.to_string())
        } else {
            SocialError::Network(err.to_string())
        }
    }
}

// --- Wire types ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

/// Strong reference to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyRef {
    pub root: PostRef,
    pub parent: PostRef,
}

/// A post that mentions the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub author_handle: String,
    pub text: String,
    pub created_at: Option<String>,
    /// Thread root when the mention is itself a reply.
    pub root: Option<PostRef>,
}

impl Mention {
    pub fn post_ref(&self) -> PostRef {
        PostRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }

    /// Reply target for the first chunk: the mention is the parent and the
    /// thread root is kept when there is one.
    pub fn reply_ref(&self) -> ReplyRef {
        ReplyRef {
            root: self.root.clone().unwrap_or_else(|| self.post_ref()),
            parent: self.post_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    cursor: Option<String>,
    #[serde(default)]
    posts: Vec<PostView>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    uri: String,
    cid: String,
    author: Author,
    record: RecordView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    did: String,
    handle: String,
    #[allow(dead_code)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordView {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    reply: Option<ReplyView>,
}

#[derive(Debug, Deserialize)]
struct ReplyView {
    root: Option<PostRef>,
}

impl From<PostView> for Mention {
    fn from(view: PostView) -> Self {
        Self {
            uri: view.uri,
            cid: view.cid,
            author_did: view.author.did,
            author_handle: view.author.handle,
            text: view.record.text,
            created_at: view.record.created_at,
            root: view.record.reply.and_then(|r| r.root),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSession<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRecord<'a> {
    repo: &'a str,
    collection: &'a str,
    record: PostRecord<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord<'a> {
    #[serde(rename = "$type")]
    kind: &'a str,
    text: &'a str,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<&'a ReplyRef>,
}

// --- Port ---

#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn create_session(&self) -> Result<Session>;

    /// Newest posts mentioning `handle` since `since`, at most `limit`.
    async fn search_mentions(
        &self,
        session: &Session,
        handle: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Mention>>;

    async fn create_post(
        &self,
        session: &Session,
        text: &str,
        reply: Option<&ReplyRef>,
    ) -> Result<PostRef>;
}

// --- Client ---

pub struct BlueskyClient {
    client: reqwest::Client,
    host: String,
    identifier: String,
    password: String,
}

impl BlueskyClient {
    pub fn new(host: &str, identifier: &str, password: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            identifier: identifier.to_string(),
            password: password.to_string(),
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.host, method)
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SocialError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SocialError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SocialApi for BlueskyClient {
    async fn create_session(&self) -> Result<Session> {
        let resp = self
            .client
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&CreateSession {
                identifier: &self.identifier,
                password: &self.password,
            })
            .send()
            .await
            .map_err(SocialError::from)?;
        let session: Session = Self::parse(resp).await?;
        debug!(handle = %session.handle, "Session created");
        Ok(session)
    }

    async fn search_mentions(
        &self,
        session: &Session,
        handle: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Mention>> {
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut mentions = Vec::new();
        let mut cursor: Option<String> = None;

        while mentions.len() < limit {
            let mut query = vec![
                ("q", handle.to_string()),
                ("sort", "latest".to_string()),
                ("limit", SEARCH_PAGE_LIMIT.to_string()),
                ("since", since.clone()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let resp = self
                .client
                .get(self.xrpc("app.bsky.feed.searchPosts"))
                .bearer_auth(&session.access_jwt)
                .query(&query)
                .send()
                .await
                .map_err(SocialError::from)?;
            let page: SearchResponse = Self::parse(resp).await?;

            let exhausted = page.posts.is_empty();
            mentions.extend(page.posts.into_iter().map(Mention::from));
            match page.cursor {
                Some(next) if !exhausted => cursor = Some(next),
                _ => break,
            }
        }

        mentions.truncate(limit);
        debug!(count = mentions.len(), "Mentions fetched");
        Ok(mentions)
    }

    async fn create_post(
        &self,
        session: &Session,
        text: &str,
        reply: Option<&ReplyRef>,
    ) -> Result<PostRef> {
        let body = CreateRecord {
            repo: &session.did,
            collection: POST_COLLECTION,
            record: PostRecord {
                kind: POST_COLLECTION,
                text,
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                reply,
            },
        };
        let resp = self
            .client
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(SocialError::from)?;
        Ok(Self::parse(resp).await?)
    }
}
