// Test double for the social API.
//
// MockSocial records every created post and serves a fixed mention list.
// Posts whose text contains a registered marker fail.

use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::social::{Mention, PostRef, ReplyRef, Session, SocialApi};

pub const BOT_DID: &str = "did:plc:bot";
pub const BOT_HANDLE: &str = "bot.bsky.social";

/// A post the bot created through [`MockSocial`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPost {
    pub uri: String,
    pub text: String,
    pub reply: Option<ReplyRef>,
}

pub struct MockSocial {
    mentions: Mutex<Vec<Mention>>,
    posts: Mutex<Vec<CreatedPost>>,
    searches: Mutex<Vec<(String, DateTime<Utc>, usize)>>,
    fail_marker: Option<String>,
}

impl MockSocial {
    pub fn new() -> Self {
        Self {
            mentions: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            fail_marker: None,
        }
    }

    pub fn with_mention(self, mention: Mention) -> Self {
        self.mentions.lock().unwrap().push(mention);
        self
    }

    /// Creating a post whose text contains `marker` fails.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn push_mention(&self, mention: Mention) {
        self.mentions.lock().unwrap().push(mention);
    }

    pub fn posts(&self) -> Vec<CreatedPost> {
        self.posts.lock().unwrap().clone()
    }

    /// `(handle, since, limit)` of every search.
    pub fn searches(&self) -> Vec<(String, DateTime<Utc>, usize)> {
        self.searches.lock().unwrap().clone()
    }
}

impl Default for MockSocial {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocialApi for MockSocial {
    async fn create_session(&self) -> Result<Session> {
        Ok(Session {
            access_jwt: "access".into(),
            refresh_jwt: "refresh".into(),
            handle: BOT_HANDLE.into(),
            did: BOT_DID.into(),
        })
    }

    async fn search_mentions(
        &self,
        _session: &Session,
        handle: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Mention>> {
        self.searches
            .lock()
            .unwrap()
            .push((handle.to_string(), since, limit));
        let mentions = self.mentions.lock().unwrap();
        Ok(mentions.iter().take(limit).cloned().collect())
    }

    async fn create_post(
        &self,
        _session: &Session,
        text: &str,
        reply: Option<&ReplyRef>,
    ) -> Result<PostRef> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                bail!("MockSocial: scripted post failure");
            }
        }
        let mut posts = self.posts.lock().unwrap();
        let n = posts.len();
        let created = PostRef {
            uri: format!("at://{BOT_DID}/app.bsky.feed.post/reply{n}"),
            cid: format!("cid-reply{n}"),
        };
        posts.push(CreatedPost {
            uri: created.uri.clone(),
            text: text.to_string(),
            reply: reply.cloned(),
        });
        Ok(created)
    }
}

/// A top-level mention of the bot by `author`.
pub fn mention(author: &str, rkey: &str, text: &str) -> Mention {
    let did = format!("did:plc:{author}");
    Mention {
        uri: format!("at://{did}/app.bsky.feed.post/{rkey}"),
        cid: format!("cid-{rkey}"),
        author_did: did,
        author_handle: format!("{author}.bsky.social"),
        text: text.to_string(),
        created_at: None,
        root: None,
    }
}
