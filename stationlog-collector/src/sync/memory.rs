use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use jiff::Timestamp;

use super::queue::{RetryQueue, SyncJob};

/// In-memory queue. Jobs do not survive a restart.
#[derive(Clone, Default)]
pub struct MemoryRetryQueue {
    jobs: Arc<Mutex<HashMap<String, SyncJob>>>,
}

impl MemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryQueueError {
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
}

impl<T> From<PoisonError<T>> for MemoryQueueError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryQueueError::MutexPoisoned(err.to_string())
    }
}

#[async_trait]
impl RetryQueue for MemoryRetryQueue {
    type Error = MemoryQueueError;

    async fn upsert(&self, job: SyncJob) -> Result<(), Self::Error> {
        self.jobs.lock()?.insert(job.tag.clone(), job);
        Ok(())
    }

    async fn get(&self, tag: &str) -> Result<Option<SyncJob>, Self::Error> {
        Ok(self.jobs.lock()?.get(tag).cloned())
    }

    async fn remove(&self, tag: &str) -> Result<(), Self::Error> {
        self.jobs.lock()?.remove(tag);
        Ok(())
    }

    async fn due(&self, now: Timestamp) -> Result<Vec<SyncJob>, Self::Error> {
        let mut due: Vec<SyncJob> = self
            .jobs
            .lock()?
            .values()
            .filter(|job| job.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        Ok(due)
    }

    async fn len(&self) -> Result<usize, Self::Error> {
        Ok(self.jobs.lock()?.len())
    }
}
