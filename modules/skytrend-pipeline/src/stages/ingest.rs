//! Firehose (Jetstream) → `raw`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use skytrend_common::file_config::FirehoseConfig;
use skytrend_common::{Operation, PostEvent, SkytrendError, POST_COLLECTION};
use skytrend_store::{EntryId, StreamLog};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::runtime::Shutdown;

// --- Wire format ---

#[derive(Debug, Deserialize)]
struct JetstreamEvent {
    did: String,
    time_us: i64,
    kind: String,
    commit: Option<Commit>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    operation: String,
    collection: Option<String>,
    rkey: String,
    record: Option<Record>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    text: Option<String>,
    created_at: Option<String>,
    langs: Option<Vec<String>>,
    reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    parent: Option<PostRef>,
    root: Option<PostRef>,
}

#[derive(Debug, Deserialize)]
struct PostRef {
    uri: Option<String>,
}

/// Project one firehose message onto a [`PostEvent`].
///
/// Returns `Ok(None)` for events that are not post commits (identity and
/// account events, other collections).
pub fn parse_event(raw: &str) -> Result<Option<PostEvent>, SkytrendError> {
    let event: JetstreamEvent =
        serde_json::from_str(raw).map_err(|e| SkytrendError::Parse(e.to_string()))?;

    if event.kind != "commit" {
        return Ok(None);
    }
    let Some(commit) = event.commit else {
        return Ok(None);
    };
    if commit
        .collection
        .as_deref()
        .is_some_and(|c| c != POST_COLLECTION)
    {
        return Ok(None);
    }

    let operation = Operation::from_str(&commit.operation)?;
    let record = commit.record;
    let reply = record.as_ref().and_then(|r| r.reply.as_ref());

    Ok(Some(PostEvent {
        uri: PostEvent::post_uri(&event.did, &commit.rkey),
        rkey: commit.rkey,
        text: record.as_ref().and_then(|r| r.text.clone()).unwrap_or_default(),
        time_us: event.time_us,
        operation,
        parent_uri: reply.and_then(|r| r.parent.as_ref()).and_then(|p| p.uri.clone()),
        root_uri: reply.and_then(|r| r.root.as_ref()).and_then(|p| p.uri.clone()),
        langs: record.as_ref().and_then(|r| r.langs.clone()).unwrap_or_default(),
        created_at: record.as_ref().and_then(|r| r.created_at.clone()),
        did: event.did,
    }))
}

// --- Reconnect backoff ---

/// Exponential reconnect delay: `initial`, doubling, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

// --- Worker ---

/// Attempts per `raw` append before the connection is given up.
pub const APPEND_ATTEMPTS: u32 = 5;
const APPEND_BACKOFF: Duration = Duration::from_millis(100);

/// Single ingest worker. No dedup here; later stages gate on uri.
pub struct IngestWorker {
    log: Arc<dyn StreamLog>,
    raw_stream: String,
    max_len: u64,
    firehose: FirehoseConfig,
    append_backoff: Duration,
}

impl IngestWorker {
    pub fn new(
        log: Arc<dyn StreamLog>,
        raw_stream: impl Into<String>,
        max_len: u64,
        firehose: FirehoseConfig,
    ) -> Self {
        Self {
            log,
            raw_stream: raw_stream.into(),
            max_len,
            firehose,
            append_backoff: APPEND_BACKOFF,
        }
    }

    /// First delay between append retries; doubles per attempt.
    pub fn with_append_backoff(mut self, initial: Duration) -> Self {
        self.append_backoff = initial;
        self
    }

    /// Parse one message and append it to `raw`. Unparseable messages are
    /// logged and dropped. A failing append is retried with backoff and
    /// only returned once every attempt has failed.
    pub async fn ingest_message(&self, raw: &str) -> Result<Option<EntryId>> {
        let post = match parse_event(raw) {
            Ok(Some(post)) => post,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Dropping unparseable firehose message");
                return Ok(None);
            }
        };
        let id = self.append(&post).await?;
        debug!(uri = %post.uri, id = %id, "Appended to raw");
        Ok(Some(id))
    }

    async fn append(&self, post: &PostEvent) -> Result<EntryId> {
        let fields = post.to_fields();
        let mut backoff = Backoff::new(self.append_backoff, self.append_backoff * 16);
        let mut attempt = 1;
        loop {
            match self.log.append(&self.raw_stream, &fields, self.max_len).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < APPEND_ATTEMPTS => {
                    let delay = backoff.next_delay();
                    warn!(uri = %post.uri, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Append to raw failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "append of {} to {} failed after {APPEND_ATTEMPTS} attempts",
                        post.uri, self.raw_stream
                    )))
                }
            }
        }
    }

    /// Stay connected until shutdown, reconnecting with backoff.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        let mut backoff = Backoff::new(
            Duration::from_secs(self.firehose.backoff_initial_secs),
            Duration::from_secs(self.firehose.backoff_max_secs),
        );

        while !shutdown.is_triggered() {
            let connect = tokio::select! {
                res = tokio_tungstenite::connect_async(self.firehose.url.as_str()) => res,
                _ = shutdown.wait() => break,
            };

            match connect {
                Ok((socket, _)) => {
                    info!(url = %self.firehose.url, "Connected to firehose");
                    backoff.reset();
                    if let Err(e) = self.pump(socket, &mut shutdown).await {
                        warn!(error = %e, "Firehose connection lost");
                    }
                }
                Err(e) => warn!(error = %e, "Firehose connect failed"),
            }

            if shutdown.is_triggered() {
                break;
            }
            let delay = backoff.next_delay();
            info!(delay_secs = delay.as_secs(), "Reconnecting to firehose");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => break,
            }
        }

        info!("Ingest worker stopped");
        Ok(())
    }

    async fn pump<S>(&self, mut socket: S, shutdown: &mut Shutdown) -> Result<()>
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        loop {
            tokio::select! {
                msg = socket.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.ingest_message(&text).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Firehose closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                _ = shutdown.wait() => {
                    if let Err(e) = socket.close().await {
                        debug!(error = %e, "Error closing firehose socket");
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::bail;
    use async_trait::async_trait;
    use skytrend_common::StreamFields;
    use skytrend_store::{MemoryStreamLog, StreamEntry};

    /// Memory log whose first `failures` appends fail.
    struct FlakyLog {
        inner: MemoryStreamLog,
        failures: AtomicU32,
        appends: AtomicU32,
    }

    impl FlakyLog {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStreamLog::new(),
                failures: AtomicU32::new(failures),
                appends: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamLog for FlakyLog {
        async fn append(&self, stream: &str, fields: &StreamFields, max_len: u64) -> Result<EntryId> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                bail!("connection reset");
            }
            self.inner.append(stream, fields, max_len).await
        }

        async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
            self.inner.create_group(stream, group).await
        }

        async fn read_group(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamEntry>> {
            self.inner.read_group(stream, group, consumer, count).await
        }

        async fn read_pending(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamEntry>> {
            self.inner.read_pending(stream, group, consumer, count).await
        }

        async fn claim_idle(
            &self,
            stream: &str,
            group: &str,
            consumer: &str,
            min_idle: Duration,
            count: usize,
        ) -> Result<Vec<StreamEntry>> {
            self.inner.claim_idle(stream, group, consumer, min_idle, count).await
        }

        async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool> {
            self.inner.ack(stream, group, id).await
        }

        async fn len(&self, stream: &str) -> Result<u64> {
            self.inner.len(stream).await
        }

        async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
            self.inner.pending_count(stream, group).await
        }
    }

    fn flaky_worker(failures: u32) -> (IngestWorker, Arc<FlakyLog>) {
        let log = Arc::new(FlakyLog::new(failures));
        let worker = IngestWorker::new(log.clone(), "raw", 1_000_000, FirehoseConfig::default())
            .with_append_backoff(Duration::from_millis(1));
        (worker, log)
    }

    const CREATE: &str = r#"{"did":"d1","time_us":1700000000000000,"kind":"commit","commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k1","record":{"$type":"app.bsky.feed.post","text":"I love LangChain and OpenAI APIs.","createdAt":"2024-11-14T22:13:20Z","langs":["en"],"reply":{"parent":{"cid":"c1","uri":"at://d0/app.bsky.feed.post/p"},"root":{"cid":"c0","uri":"at://d0/app.bsky.feed.post/r"}}}}}"#;

    #[test]
    fn parses_create_commit() {
        let post = parse_event(CREATE).unwrap().unwrap();
        assert_eq!(post.uri, "at://d1/app.bsky.feed.post/k1");
        assert_eq!(post.operation, Operation::Create);
        assert_eq!(post.text, "I love LangChain and OpenAI APIs.");
        assert_eq!(post.time_us, 1_700_000_000_000_000);
        assert_eq!(post.langs, vec!["en"]);
        assert_eq!(post.parent_uri.as_deref(), Some("at://d0/app.bsky.feed.post/p"));
        assert_eq!(post.root_uri.as_deref(), Some("at://d0/app.bsky.feed.post/r"));
        assert_eq!(post.created_at.as_deref(), Some("2024-11-14T22:13:20Z"));
    }

    #[test]
    fn delete_has_no_text() {
        let raw = r#"{"did":"d1","time_us":1,"kind":"commit","commit":{"rev":"r","operation":"delete","collection":"app.bsky.feed.post","rkey":"k1"}}"#;
        let post = parse_event(raw).unwrap().unwrap();
        assert_eq!(post.operation, Operation::Delete);
        assert!(post.text.is_empty());
        assert!(post.is_trivial());
    }

    #[test]
    fn non_commit_events_are_skipped() {
        let raw = r#"{"did":"d1","time_us":1,"kind":"identity","identity":{"did":"d1"}}"#;
        assert!(parse_event(raw).unwrap().is_none());
        let like = r#"{"did":"d1","time_us":1,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.like","rkey":"k"}}"#;
        assert!(parse_event(like).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse_event("{not json"), Err(SkytrendError::Parse(_))));
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(30));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
        b.reset();
        assert_eq!(b.next_delay().as_secs(), 2);
    }

    #[tokio::test]
    async fn ingest_appends_and_drops_garbage() {
        let log = Arc::new(MemoryStreamLog::new());
        let worker = IngestWorker::new(log.clone(), "raw", 1_000_000, FirehoseConfig::default());

        assert!(worker.ingest_message(CREATE).await.unwrap().is_some());
        assert!(worker.ingest_message("garbage").await.unwrap().is_none());
        assert_eq!(log.len("raw").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transient_append_failures_are_retried() {
        let (worker, log) = flaky_worker(APPEND_ATTEMPTS - 1);
        assert!(worker.ingest_message(CREATE).await.unwrap().is_some());
        assert_eq!(log.appends.load(Ordering::SeqCst), APPEND_ATTEMPTS);
        assert_eq!(log.len("raw").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_gives_up_after_bounded_attempts() {
        let (worker, log) = flaky_worker(APPEND_ATTEMPTS);
        assert!(worker.ingest_message(CREATE).await.is_err());
        assert_eq!(log.appends.load(Ordering::SeqCst), APPEND_ATTEMPTS);
        assert_eq!(log.len("raw").await.unwrap(), 0);
    }
}
