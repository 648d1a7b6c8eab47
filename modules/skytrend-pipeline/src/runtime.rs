//! Worker runtime shared by the filter, embed and topic stages.
//!
//! A [`WorkerPool`] runs N consumers (`consumer-0` .. `consumer-{N-1}`) of one
//! consumer group. Each consumer:
//!
//! 1. recovers its own pending entries (read but never acked before a crash),
//! 2. reads new entries in batches and hands each to the stage handler,
//! 3. acks after the handler has committed its side effects,
//! 4. every `claim_idle` re-reads its own pending entries and claims entries
//!    stuck on other consumers for longer than `claim_idle`.
//!
//! On shutdown a consumer finishes the entry it is working on, stops
//! reading, and exits. Unprocessed entries stay pending for the next start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use skytrend_common::file_config::StreamsConfig;
use skytrend_store::{StreamEntry, StreamLog};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// Stage errors
// =============================================================================

#[derive(Debug, Error)]
pub enum StageError {
    /// Infrastructure hiccup. The entry is left pending and retried later.
    #[error("transient: {0}")]
    Transient(anyhow::Error),

    /// Problem with this entry. Logged, then acked so it cannot poison the group.
    #[error("item: {0}")]
    Item(anyhow::Error),
}

impl StageError {
    pub fn transient(e: impl Into<anyhow::Error>) -> Self {
        StageError::Transient(e.into())
    }

    pub fn item(e: impl Into<anyhow::Error>) -> Self {
        StageError::Item(e.into())
    }
}

/// What a handler decided about one entry. Both variants are acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Skipped(&'static str),
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, entry: &StreamEntry) -> Result<Outcome, StageError>;
}

// =============================================================================
// Shutdown
// =============================================================================

/// Sending half of the shutdown signal.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable shutdown observer handed to every task.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered (or the trigger is gone).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Trigger shutdown on Ctrl-C.
pub fn shutdown_on_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        trigger.trigger();
    });
}

// =============================================================================
// Worker pool
// =============================================================================

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream: String,
    pub group: String,
    pub batch_size: usize,
    pub idle_poll: Duration,
    pub claim_idle: Duration,
}

impl ConsumerSettings {
    pub fn new(stream: &str, group: &str, streams: &StreamsConfig) -> Self {
        Self {
            stream: stream.to_string(),
            group: group.to_string(),
            batch_size: streams.batch_size,
            idle_poll: Duration::from_millis(streams.idle_poll_ms),
            claim_idle: Duration::from_secs(streams.claim_idle_secs),
        }
    }
}

pub struct WorkerPool {
    log: Arc<dyn StreamLog>,
    settings: ConsumerSettings,
    workers: usize,
    handler: Arc<dyn StageHandler>,
}

impl WorkerPool {
    pub fn new(
        log: Arc<dyn StreamLog>,
        settings: ConsumerSettings,
        workers: usize,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        Self {
            log,
            settings,
            workers: workers.max(1),
            handler,
        }
    }

    /// Run every consumer until shutdown.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        self.log
            .create_group(&self.settings.stream, &self.settings.group)
            .await?;

        info!(
            stage = self.handler.name(),
            stream = %self.settings.stream,
            group = %self.settings.group,
            workers = self.workers,
            "Starting worker pool"
        );

        let mut tasks = JoinSet::new();
        for i in 0..self.workers {
            let consumer = Consumer {
                log: self.log.clone(),
                settings: self.settings.clone(),
                name: format!("consumer-{i}"),
                handler: self.handler.clone(),
            };
            tasks.spawn(consumer.run(shutdown.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(stage = self.handler.name(), error = %e, "Consumer task panicked");
            }
        }

        info!(stage = self.handler.name(), "Worker pool stopped");
        Ok(())
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// Longest pause after a failed log read.
const MAX_READ_BACKOFF: Duration = Duration::from_secs(30);

pub struct Consumer {
    log: Arc<dyn StreamLog>,
    settings: ConsumerSettings,
    name: String,
    handler: Arc<dyn StageHandler>,
}

impl Consumer {
    pub fn new(
        log: Arc<dyn StreamLog>,
        settings: ConsumerSettings,
        name: impl Into<String>,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        Self {
            log,
            settings,
            name: name.into(),
            handler,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        debug!(stage = self.handler.name(), consumer = %self.name, "Consumer started");

        let mut read_backoff = self.settings.idle_poll;
        // Start with a recovery pass.
        let mut last_recovery: Option<Instant> = None;

        while !shutdown.is_triggered() {
            let recovery_due = last_recovery.map_or(true, |at| at.elapsed() >= self.settings.claim_idle);
            if recovery_due {
                if let Err(e) = self.recover(&shutdown).await {
                    warn!(consumer = %self.name, error = %e, "Pending recovery failed");
                }
                last_recovery = Some(Instant::now());
            }

            let batch = match self
                .log
                .read_group(
                    &self.settings.stream,
                    &self.settings.group,
                    &self.name,
                    self.settings.batch_size,
                )
                .await
            {
                Ok(batch) => {
                    read_backoff = self.settings.idle_poll;
                    batch
                }
                Err(e) => {
                    warn!(
                        stream = %self.settings.stream,
                        consumer = %self.name,
                        error = %e,
                        "Log read failed"
                    );
                    self.pause(&mut shutdown, read_backoff).await;
                    read_backoff = (read_backoff * 2).min(MAX_READ_BACKOFF);
                    continue;
                }
            };

            if batch.is_empty() {
                self.pause(&mut shutdown, self.settings.idle_poll).await;
                continue;
            }

            self.process_batch(batch, &shutdown).await;
        }

        debug!(stage = self.handler.name(), consumer = %self.name, "Consumer stopped");
    }

    /// Drain our own pending entries, then claim idle ones from other consumers.
    /// Stops as soon as a page makes no progress, so entries failing
    /// transiently are retried on the next recovery pass instead of spinning.
    async fn recover(&self, shutdown: &Shutdown) -> Result<()> {
        let s = &self.settings;
        loop {
            let pending = self
                .log
                .read_pending(&s.stream, &s.group, &self.name, s.batch_size)
                .await?;
            if pending.is_empty() {
                break;
            }
            info!(consumer = %self.name, count = pending.len(), "Recovering pending entries");
            if self.process_batch(pending, shutdown).await == 0 {
                break;
            }
        }

        let claimed = self
            .log
            .claim_idle(&s.stream, &s.group, &self.name, s.claim_idle, s.batch_size)
            .await?;
        if !claimed.is_empty() {
            info!(consumer = %self.name, count = claimed.len(), "Claimed idle entries");
            self.process_batch(claimed, shutdown).await;
        }
        Ok(())
    }

    /// Handle entries in order and return how many were acked.
    pub async fn process_batch(&self, batch: Vec<StreamEntry>, shutdown: &Shutdown) -> usize {
        let mut acked = 0;
        for entry in batch {
            if shutdown.is_triggered() {
                break;
            }
            if self.process(&entry).await {
                acked += 1;
            }
        }
        acked
    }

    async fn process(&self, entry: &StreamEntry) -> bool {
        let stage = self.handler.name();
        match self.handler.handle(entry).await {
            Ok(Outcome::Processed) => {
                debug!(stage, id = %entry.id, "Entry processed");
            }
            Ok(Outcome::Skipped(reason)) => {
                debug!(stage, id = %entry.id, reason, "Entry skipped");
            }
            Err(StageError::Item(e)) => {
                warn!(stage, id = %entry.id, error = %e, "Dropping entry");
            }
            Err(StageError::Transient(e)) => {
                warn!(
                    stage,
                    id = %entry.id,
                    deliveries = entry.deliveries,
                    error = %e,
                    "Entry left pending"
                );
                return false;
            }
        }

        match self
            .log
            .ack(&self.settings.stream, &self.settings.group, entry.id)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(stage, id = %entry.id, error = %e, "Ack failed");
                false
            }
        }
    }

    async fn pause(&self, shutdown: &mut Shutdown, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.wait() => {}
        }
    }
}
