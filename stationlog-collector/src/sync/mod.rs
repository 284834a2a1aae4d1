//! Deferred collection that survives failures and restarts.
//!
//! Jobs are registered under a tag and kept in a [`RetryQueue`]. The sync
//! loop runs due jobs against the ingestion client. Retryable failures are
//! rescheduled with exponential backoff, terminal ones give up at once.

pub mod memory;
pub mod queue;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use stationlog_core::{IngestSummary, ValidationError, nonzero_interval};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::IngestionClient;
use queue::{RetryPolicy, RetryQueue, SyncJob};

pub use memory::MemoryRetryQueue;
pub use sqlite::SqliteRetryQueue;

/// Broadcast to every subscriber after a deferred collection succeeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    CollectionCompleted {
        tag: String,
        summary: IngestSummary,
        at: Timestamp,
    },
}

/// What a single pass over the due jobs did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncRound {
    pub succeeded: u32,
    pub rescheduled: u32,
    pub dropped: u32,
}

pub struct BackgroundSync<Q, C> {
    queue: Q,
    client: Arc<C>,
    policy: RetryPolicy,
    events: broadcast::Sender<SyncMessage>,
}

impl<Q: Clone, C> Clone for BackgroundSync<Q, C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            client: Arc::clone(&self.client),
            policy: self.policy,
            events: self.events.clone(),
        }
    }
}

fn after(now: Timestamp, delay: Duration) -> Timestamp {
    SignedDuration::try_from(delay)
        .ok()
        .and_then(|delay| now.checked_add(delay).ok())
        .unwrap_or(Timestamp::MAX)
}

impl<Q, C> BackgroundSync<Q, C>
where
    Q: RetryQueue,
    C: IngestionClient,
{
    pub fn new(queue: Q, client: Arc<C>, policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            queue,
            client,
            policy,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.events.subscribe()
    }

    /// Sender side of the completion channel, for surfaces that subscribe later.
    pub fn events(&self) -> broadcast::Sender<SyncMessage> {
        self.events.clone()
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Registers a job that runs as soon as the sync loop sees it.
    pub async fn register_one_off(&self, tag: &str) -> Result<(), Q::Error> {
        info!(tag, "Registering one-off sync");
        self.queue.upsert(SyncJob::one_off(tag, Timestamp::now())).await
    }

    /// Registers a job that runs every `every`, first after one period.
    pub async fn register_periodic(&self, tag: &str, every: Duration) -> Result<(), Q::Error> {
        info!(tag, every_secs = every.as_secs(), "Registering periodic sync");
        let now = Timestamp::now();
        self.queue
            .upsert(SyncJob::periodic(tag, every, after(now, every)))
            .await
    }

    /// Runs every job due at `now` once.
    pub async fn run_due(&self, now: Timestamp) -> Result<SyncRound, Q::Error> {
        let mut round = SyncRound::default();

        for job in self.queue.due(now).await? {
            match self.client.collect_self().await {
                Ok(summary) => {
                    round.succeeded += 1;
                    info!(tag = %job.tag, imported = summary.imported, "Deferred collection succeeded");
                    self.settle(job.clone(), now).await?;
                    // Nobody listening is fine.
                    let _ = self.events.send(SyncMessage::CollectionCompleted {
                        tag: job.tag,
                        summary,
                        at: Timestamp::now(),
                    });
                }
                Err(e) if e.is_retryable() && job.attempts + 1 < self.policy.max_attempts => {
                    let delay = self.policy.backoff(job.attempts);
                    warn!(
                        tag = %job.tag,
                        attempts = job.attempts + 1,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Deferred collection failed, will retry"
                    );
                    round.rescheduled += 1;
                    self.queue
                        .upsert(SyncJob {
                            attempts: job.attempts + 1,
                            next_attempt_at: after(now, delay),
                            ..job
                        })
                        .await?;
                }
                Err(e) => {
                    warn!(tag = %job.tag, attempts = job.attempts + 1, error = %e, "Deferred collection given up");
                    round.dropped += 1;
                    self.settle(job, now).await?;
                }
            }
        }

        Ok(round)
    }

    /// Ends the current cycle: one-off jobs leave the queue, periodic jobs
    /// wait for their next period.
    async fn settle(&self, job: SyncJob, now: Timestamp) -> Result<(), Q::Error> {
        match job.every {
            Some(every) => {
                self.queue
                    .upsert(SyncJob {
                        attempts: 0,
                        next_attempt_at: after(now, every),
                        ..job
                    })
                    .await
            }
            None => self.queue.remove(&job.tag).await,
        }
    }

    /// Polls the queue every `poll` until `cancel` fires.
    pub async fn run(self, poll: Duration, cancel: CancellationToken) -> Result<(), ValidationError> {
        let poll = nonzero_interval("sync poll interval", poll)?;
        info!(poll_secs = poll.as_secs(), "Background sync started");
        let mut interval = tokio::time::interval(poll);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Background sync shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_due(Timestamp::now()).await {
                        Ok(round) if round != SyncRound::default() => info!(
                            succeeded = round.succeeded,
                            rescheduled = round.rescheduled,
                            dropped = round.dropped,
                            "Sync round finished"
                        ),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Failed to read retry queue"),
                    }
                }
            }
        }

        Ok(())
    }
}
