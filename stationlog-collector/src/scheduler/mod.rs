//! Foreground collection on a fixed cadence.
//!
//! [`CollectionScheduler`] owns the session status and talks to a
//! [`worker::TimerWorker`] task through a command channel. Ticks come back on
//! a second channel and are collected one at a time.

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use stationlog_core::{CollectionStatus, IngestSummary, ValidationError, nonzero_interval};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::{IngestClientError, IngestionClient};
use worker::{Command, OverlapGuard, Permit, Tick, TimerWorker};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("timer worker is not running")]
    WorkerStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("last collection was {elapsed_secs}s ago, wait {retry_after_secs}s")]
    TooSoon {
        elapsed_secs: u64,
        retry_after_secs: u64,
    },

    #[error("a collection is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Ingest(#[from] IngestClientError),
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Shortest interval accepted by `start` and `update_interval`.
    pub min_interval: Duration,
    /// Minimum spacing between a manual collection and the last success.
    pub manual_min_spacing: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(60),
            manual_min_spacing: Duration::from_secs(60),
        }
    }
}

struct Inner<C> {
    client: Arc<C>,
    commands: mpsc::UnboundedSender<Command>,
    guard: OverlapGuard,
    status: Mutex<CollectionStatus>,
    settings: SchedulerSettings,
}

pub struct CollectionScheduler<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for CollectionScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: IngestionClient> CollectionScheduler<C> {
    /// Spawns the timer worker and the tick consumer. Both stop on `cancel`.
    ///
    /// The scheduler starts inactive.
    pub fn spawn(client: Arc<C>, settings: SchedulerSettings, cancel: CancellationToken) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let guard = OverlapGuard::new();

        let scheduler = Self {
            inner: Arc::new(Inner {
                client,
                commands: command_tx,
                guard: guard.clone(),
                status: Mutex::new(CollectionStatus::default()),
                settings,
            }),
        };

        tokio::spawn(TimerWorker::new(command_rx, tick_tx, guard).run(cancel.clone()));
        tokio::spawn(consume_ticks(scheduler.clone(), tick_rx, cancel));

        scheduler
    }

    /// Starts periodic collection with one immediate run.
    ///
    /// A no-op when already active at `interval`. A different interval
    /// re-arms the timer and keeps the session counters.
    pub async fn start(&self, interval: Duration) -> Result<(), SchedulerError> {
        self.validate(interval)?;
        let interval_ms = interval.as_millis() as u64;

        let mut status = self.inner.status.lock().await;
        if status.is_active && status.current_interval_ms == interval_ms {
            return Ok(());
        }

        self.send(Command::Start { interval })?;
        status.is_active = true;
        status.current_interval_ms = interval_ms;

        info!(interval_ms, "Collection scheduler started");
        Ok(())
    }

    /// Suppresses future ticks. A collection already running is not cancelled.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut status = self.inner.status.lock().await;
        if !status.is_active {
            return Ok(());
        }

        self.send(Command::Stop)?;
        status.is_active = false;

        info!("Collection scheduler stopped");
        Ok(())
    }

    pub async fn update_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        self.validate(interval)?;
        let interval_ms = interval.as_millis() as u64;

        let mut status = self.inner.status.lock().await;
        if status.current_interval_ms == interval_ms {
            return Ok(());
        }

        self.send(Command::UpdateInterval { interval })?;
        status.current_interval_ms = interval_ms;

        info!(interval_ms, "Collection interval updated");
        Ok(())
    }

    /// Runs a user-requested collection outside the timer.
    pub async fn collect_now(&self) -> Result<IngestSummary, CollectError> {
        let now = Timestamp::now();

        if let Some(last) = self.inner.status.lock().await.last_collection {
            let elapsed = now.duration_since(last);
            let spacing = SignedDuration::try_from(self.inner.settings.manual_min_spacing)
                .unwrap_or(SignedDuration::MAX);
            if elapsed < spacing {
                return Err(CollectError::TooSoon {
                    elapsed_secs: elapsed.as_secs().max(0) as u64,
                    retry_after_secs: (spacing - elapsed).as_secs().max(1) as u64,
                });
            }
        }

        let permit = self
            .inner
            .guard
            .try_acquire()
            .ok_or(CollectError::AlreadyRunning)?;

        self.collect(permit, now).await.map_err(Into::into)
    }

    pub async fn status(&self) -> CollectionStatus {
        self.inner.status.lock().await.clone()
    }

    pub fn is_collecting(&self) -> bool {
        self.inner.guard.is_held()
    }

    pub fn guard(&self) -> &OverlapGuard {
        &self.inner.guard
    }

    fn validate(&self, interval: Duration) -> Result<(), ValidationError> {
        nonzero_interval("collection interval", interval)?;
        let min = self.inner.settings.min_interval;
        if interval < min {
            return Err(ValidationError::IntervalTooShort {
                got_ms: interval.as_millis() as u64,
                min_ms: min.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| SchedulerError::WorkerStopped)
    }

    /// One collection. The permit is held until the request settles.
    #[instrument(skip_all)]
    async fn collect(
        &self,
        permit: Permit,
        started_at: Timestamp,
    ) -> Result<IngestSummary, IngestClientError> {
        self.inner.status.lock().await.last_tick = Some(started_at);

        let result = self.inner.client.collect_self().await;

        let mut status = self.inner.status.lock().await;
        match &result {
            Ok(summary) => {
                status.success_count += 1;
                status.last_collection = Some(Timestamp::now());
                info!(
                    imported = summary.imported,
                    skipped = summary.skipped,
                    "Collection succeeded"
                );
            }
            Err(e) => {
                status.error_count += 1;
                warn!(error = %e, retryable = e.is_retryable(), "Collection failed");
            }
        }
        // The guard clears only once the outcome is recorded.
        drop(status);
        drop(permit);

        result
    }
}

async fn consume_ticks<C: IngestionClient>(
    scheduler: CollectionScheduler<C>,
    mut ticks: mpsc::Receiver<Tick>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            tick = ticks.recv() => match tick {
                // Failures only feed the counters.
                Some(Tick { at, permit }) => {
                    let _ = scheduler.collect(permit, at).await;
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Counts calls and answers after `delay`; fails while `fail` is set.
    #[derive(Default)]
    struct CountingClient {
        calls: AtomicU32,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl IngestionClient for CountingClient {
        async fn collect_self(&self) -> Result<IngestSummary, IngestClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(IngestClientError::Server {
                    status: 503,
                    message: "down".into(),
                });
            }
            Ok(IngestSummary {
                imported: 1,
                skipped: 0,
            })
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            min_interval: Duration::from_millis(10),
            manual_min_spacing: Duration::from_secs(60),
        }
    }

    fn spawn(client: CountingClient) -> (CollectionScheduler<CountingClient>, Arc<CountingClient>) {
        let client = Arc::new(client);
        let scheduler =
            CollectionScheduler::spawn(Arc::clone(&client), settings(), CancellationToken::new());
        (scheduler, client)
    }

    #[tokio::test]
    async fn start_twice_with_same_interval_runs_once() {
        let (scheduler, client) = spawn(CountingClient::default());

        scheduler.start(Duration::from_secs(3600)).await.unwrap();
        scheduler.start(Duration::from_secs(3600)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        let status = scheduler.status().await;
        assert!(status.is_active);
        assert_eq!(status.success_count, 1);
        assert!(status.last_collection.is_some());
    }

    #[tokio::test]
    async fn restart_with_new_interval_keeps_counters() {
        let (scheduler, _client) = spawn(CountingClient::default());

        scheduler.start(Duration::from_secs(3600)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.start(Duration::from_secs(1800)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = scheduler.status().await;
        assert_eq!(status.current_interval_ms, 1_800_000);
        assert_eq!(status.success_count, 2);
    }

    #[tokio::test]
    async fn slow_collections_do_not_pile_up() {
        let (scheduler, client) = spawn(CountingClient {
            delay: Duration::from_millis(250),
            ..Default::default()
        });

        scheduler.start(Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.stop().await.unwrap();

        // Roughly one call per 250 ms, never one per 20 ms tick.
        let calls = client.calls.load(Ordering::SeqCst);
        assert!((2..=4).contains(&calls), "calls = {calls}");
    }

    #[tokio::test]
    async fn failures_count_errors() {
        let (scheduler, _client) = spawn(CountingClient {
            fail: true,
            ..Default::default()
        });

        scheduler.start(Duration::from_secs(3600)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = scheduler.status().await;
        assert_eq!(status.error_count, 1);
        assert_eq!(status.success_count, 0);
        assert!(status.last_collection.is_none());
    }

    #[tokio::test]
    async fn manual_collection_is_spaced_and_guarded() {
        let (scheduler, _client) = spawn(CountingClient {
            delay: Duration::from_millis(200),
            ..Default::default()
        });

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.collect_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            scheduler.collect_now().await,
            Err(CollectError::AlreadyRunning)
        ));

        running.await.unwrap().unwrap();
        assert!(matches!(
            scheduler.collect_now().await,
            Err(CollectError::TooSoon { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn guard_clears_after_outcome_is_recorded() {
        let (scheduler, _client) = spawn(CountingClient {
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.collect_now().await })
        };
        while !scheduler.is_collecting() {
            tokio::task::yield_now().await;
        }
        while scheduler.is_collecting() {
            tokio::task::yield_now().await;
        }

        // Once the guard is free a second manual run is spaced, never started.
        assert!(scheduler.status().await.last_collection.is_some());
        assert!(matches!(
            scheduler.collect_now().await,
            Err(CollectError::TooSoon { .. })
        ));
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn intervals_below_minimum_are_rejected() {
        let (scheduler, _client) = spawn(CountingClient::default());

        let err = scheduler.start(Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::IntervalTooShort { .. })
        ));
        assert!(!scheduler.status().await.is_active);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected_without_minimum() {
        let scheduler = CollectionScheduler::spawn(
            Arc::new(CountingClient::default()),
            SchedulerSettings {
                min_interval: Duration::ZERO,
                manual_min_spacing: Duration::ZERO,
            },
            CancellationToken::new(),
        );

        let err = scheduler.start(Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::ZeroInterval(_))
        ));
        assert!(matches!(
            scheduler.update_interval(Duration::ZERO).await,
            Err(SchedulerError::Validation(ValidationError::ZeroInterval(_)))
        ));
    }
}
