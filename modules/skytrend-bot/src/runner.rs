//! The bot loop: every tick, answer new mentions and reply in threads.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use skytrend_common::file_config::{BotConfig, SketchesConfig};
use skytrend_common::text::{chunk_reply, strip_handle};
use skytrend_pipeline::{Clock, Shutdown};
use skytrend_store::{BloomParams, Sketches};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheLookup, SemanticCache};
use crate::responder::Responder;
use crate::social::{Mention, Session, SocialApi};

/// Dedup filter over mention uris already answered.
pub const PROCESSED_BLOOM: &str = "processed-posts-bf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionOutcome {
    Replied { chunks: usize, cached: bool },
    Skipped(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct BotRunner {
    social: Arc<dyn SocialApi>,
    sketches: Arc<dyn Sketches>,
    cache: SemanticCache,
    responder: Responder,
    config: BotConfig,
    clock: Clock,
}

impl BotRunner {
    pub fn new(
        social: Arc<dyn SocialApi>,
        sketches: Arc<dyn Sketches>,
        cache: SemanticCache,
        responder: Responder,
        config: BotConfig,
    ) -> Self {
        Self {
            social,
            sketches,
            cache,
            responder,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Register the cache index and reserve the processed-posts filter.
    pub async fn prepare(&self, sketches: &SketchesConfig) -> Result<()> {
        self.cache.prepare().await?;
        self.sketches
            .bloom_reserve(
                PROCESSED_BLOOM,
                BloomParams::new(sketches.bloom_capacity, sketches.bloom_error_rate),
            )
            .await
    }

    /// Tick every `interval_secs` until shutdown. A failed tick is logged and
    /// the next one runs on schedule.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval_secs, "Bot started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait() => break,
            }
            match self.tick().await {
                Ok(report) if report.fetched > 0 => info!(?report, "Tick done"),
                Ok(_) => debug!("Tick found no mentions"),
                Err(e) => warn!(error = %e, "Tick failed"),
            }
            if shutdown.is_triggered() {
                break;
            }
        }
        info!("Bot stopped");
    }

    /// One pass over recent mentions. Only session and search failures abort
    /// the tick; per-mention failures are counted and logged.
    pub async fn tick(&self) -> Result<TickReport> {
        let session = self.social.create_session().await?;
        let handle = self.config.handle.clone().unwrap_or_else(|| session.handle.clone());
        let since = (self.clock)() - chrono::Duration::hours(self.config.lookback_hours);

        let mentions = self
            .social
            .search_mentions(&session, &handle, since, self.config.mentions_limit)
            .await?;

        let mut report = TickReport {
            fetched: mentions.len(),
            ..TickReport::default()
        };
        for mention in &mentions {
            match self.handle_mention(&session, &handle, mention).await {
                Ok(MentionOutcome::Replied { chunks, cached }) => {
                    info!(uri = %mention.uri, chunks, cached, "Replied to mention");
                    report.replied += 1;
                }
                Ok(MentionOutcome::Skipped(reason)) => {
                    debug!(uri = %mention.uri, reason, "Mention skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(uri = %mention.uri, error = %e, "Failed to answer mention");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn handle_mention(
        &self,
        session: &Session,
        handle: &str,
        mention: &Mention,
    ) -> Result<MentionOutcome> {
        if self.sketches.bloom_exists(PROCESSED_BLOOM, &mention.uri).await? {
            return Ok(MentionOutcome::Skipped("already processed"));
        }
        if mention.author_did == session.did {
            self.sketches.bloom_add(PROCESSED_BLOOM, &mention.uri).await?;
            return Ok(MentionOutcome::Skipped("own post"));
        }

        let query = strip_handle(&mention.text, handle);
        if query.is_empty() {
            self.sketches.bloom_add(PROCESSED_BLOOM, &mention.uri).await?;
            return Ok(MentionOutcome::Skipped("empty query"));
        }

        let (answer, cached) = match self.cache.lookup(&query).await? {
            CacheLookup::Hit { answer, .. } => (answer, true),
            CacheLookup::Miss { embedding } => {
                let answer = self.responder.answer(&query).await?.text;
                self.cache.put_embedded(&query, &answer, embedding).await?;
                (answer, false)
            }
        };

        let chunks = chunk_reply(
            &format!("@{} {}", mention.author_handle, answer),
            self.config.max_chunk_chars,
        );
        let mut reply = mention.reply_ref();
        for chunk in &chunks {
            let created = self.social.create_post(session, chunk, Some(&reply)).await?;
            reply.parent = created;
        }

        self.sketches.bloom_add(PROCESSED_BLOOM, &mention.uri).await?;
        Ok(MentionOutcome::Replied {
            chunks: chunks.len(),
            cached,
        })
    }
}
