use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use stationlog_collector::{
    BackgroundSync, IngestClientError, IngestionClient, MemoryRetryQueue, RetryPolicy,
    RetryQueue, SqliteRetryQueue, SyncJob, SyncMessage, SyncRound,
};
use stationlog_core::{IngestSummary, ValidationError};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Replays scripted outcomes; succeeds once the script runs out.
#[derive(Default)]
struct ScriptedClient {
    script: Mutex<VecDeque<Result<IngestSummary, u16>>>,
}

impl ScriptedClient {
    fn new(outcomes: impl IntoIterator<Item = Result<IngestSummary, u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().collect()),
        })
    }
}

#[async_trait]
impl IngestionClient for ScriptedClient {
    async fn collect_self(&self) -> Result<IngestSummary, IngestClientError> {
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Ok(SUMMARY)) {
            Ok(summary) => Ok(summary),
            Err(status) if status >= 500 => Err(IngestClientError::Server {
                status,
                message: "unavailable".into(),
            }),
            Err(status) => Err(IngestClientError::Client {
                status,
                message: "rejected".into(),
            }),
        }
    }
}

const SUMMARY: IngestSummary = IngestSummary {
    imported: 2,
    skipped: 0,
};

fn policy() -> RetryPolicy {
    RetryPolicy {
        base_backoff: Duration::from_secs(10),
        max_backoff: Duration::from_secs(60),
        max_attempts: 3,
    }
}

fn t0() -> Timestamp {
    Timestamp::from_second(1_717_200_000).unwrap()
}

fn secs(n: i64) -> SignedDuration {
    SignedDuration::from_secs(n)
}

async fn seed_one_off<Q: RetryQueue>(queue: &Q, tag: &str) {
    queue.upsert(SyncJob::one_off(tag, t0())).await.unwrap();
}

async fn retry_then_succeed<Q: RetryQueue>(queue: Q) {
    let client = ScriptedClient::new([Err(503), Err(502)]);
    let sync = BackgroundSync::new(queue, client, policy());
    let mut events = sync.subscribe();
    seed_one_off(sync.queue(), "collect").await;

    let round = sync.run_due(t0()).await.unwrap();
    assert_eq!(round.rescheduled, 1);
    let job = sync.queue().get("collect").await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(job.next_attempt_at, t0() + secs(10));

    // Not due yet.
    assert_eq!(sync.run_due(t0() + secs(5)).await.unwrap(), SyncRound::default());

    let round = sync.run_due(t0() + secs(10)).await.unwrap();
    assert_eq!(round.rescheduled, 1);
    let job = sync.queue().get("collect").await.unwrap().unwrap();
    assert_eq!(job.next_attempt_at, t0() + secs(30));

    let round = sync.run_due(t0() + secs(30)).await.unwrap();
    assert_eq!(round.succeeded, 1);
    assert_eq!(sync.queue().len().await.unwrap(), 0);

    match events.try_recv().unwrap() {
        SyncMessage::CollectionCompleted { tag, summary, .. } => {
            assert_eq!(tag, "collect");
            assert_eq!(summary, SUMMARY);
        }
    }
}

#[tokio::test]
async fn memory_queue_retries_with_backoff() {
    retry_then_succeed(MemoryRetryQueue::new()).await;
}

#[tokio::test]
async fn sqlite_queue_retries_with_backoff() {
    retry_then_succeed(SqliteRetryQueue::new_in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn terminal_failure_drops_job_without_broadcast() {
    let client = ScriptedClient::new([Err(403)]);
    let sync = BackgroundSync::new(MemoryRetryQueue::new(), client, policy());
    let mut events = sync.subscribe();
    seed_one_off(sync.queue(), "collect").await;

    let round = sync.run_due(t0()).await.unwrap();

    assert_eq!(round.dropped, 1);
    assert_eq!(sync.queue().len().await.unwrap(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let client = ScriptedClient::new([Err(503), Err(503), Err(503), Err(503)]);
    let sync = BackgroundSync::new(MemoryRetryQueue::new(), client, policy());
    seed_one_off(sync.queue(), "collect").await;

    let mut now = t0();
    let mut total = SyncRound::default();
    for _ in 0..5 {
        let round = sync.run_due(now).await.unwrap();
        total.rescheduled += round.rescheduled;
        total.dropped += round.dropped;
        now = now + secs(120);
    }

    assert_eq!(total.rescheduled, 2);
    assert_eq!(total.dropped, 1);
    assert_eq!(sync.queue().len().await.unwrap(), 0);
}

#[tokio::test]
async fn periodic_job_waits_for_next_period() {
    let client = ScriptedClient::new([Ok(SUMMARY), Err(400)]);
    let sync = BackgroundSync::new(MemoryRetryQueue::new(), client, policy());
    let every = Duration::from_secs(3600);
    sync.queue()
        .upsert(SyncJob::periodic("daily", every, t0()))
        .await
        .unwrap();

    sync.run_due(t0()).await.unwrap();
    let job = sync.queue().get("daily").await.unwrap().unwrap();
    assert_eq!(job.next_attempt_at, t0() + secs(3600));

    // A terminal failure keeps the periodic registration.
    let round = sync.run_due(t0() + secs(3600)).await.unwrap();
    assert_eq!(round.dropped, 1);
    let job = sync.queue().get("daily").await.unwrap().unwrap();
    assert_eq!(job.next_attempt_at, t0() + secs(7200));
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn registering_same_tag_replaces_pending_job() {
    let sync = BackgroundSync::new(MemoryRetryQueue::new(), ScriptedClient::new([]), policy());

    sync.register_one_off("collect").await.unwrap();
    sync.register_one_off("collect").await.unwrap();

    assert_eq!(sync.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn sqlite_queue_survives_reopen() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_string_lossy().to_string();

    {
        let queue = SqliteRetryQueue::new(&path).await.unwrap();
        queue
            .upsert(SyncJob {
                attempts: 2,
                ..SyncJob::periodic("daily", Duration::from_secs(86_400), t0())
            })
            .await
            .unwrap();
        seed_one_off(&queue, "collect").await;
    }

    let queue = SqliteRetryQueue::new(&path).await.unwrap();
    let due = queue.due(t0()).await.unwrap();
    let tags: Vec<&str> = due.iter().map(|j| j.tag.as_str()).collect();
    assert_eq!(tags, ["collect", "daily"]);

    let daily = queue.get("daily").await.unwrap().unwrap();
    assert_eq!(daily.every, Some(Duration::from_secs(86_400)));
    assert_eq!(daily.attempts, 2);

    queue.remove("collect").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);
    assert!(queue.due(t0() - secs(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_poll_interval_is_rejected() {
    let sync = BackgroundSync::new(MemoryRetryQueue::new(), ScriptedClient::new([]), policy());

    let result = sync.run(Duration::ZERO, CancellationToken::new()).await;

    assert_eq!(result, Err(ValidationError::ZeroInterval("sync poll interval")));
}
