use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;

/// A named deferred collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    /// Registering the same tag again replaces the pending job.
    pub tag: String,
    /// `None` for one-off jobs.
    pub every: Option<Duration>,
    /// Consecutive retryable failures since the last success.
    pub attempts: u32,
    pub next_attempt_at: Timestamp,
}

impl SyncJob {
    pub fn one_off(tag: impl Into<String>, at: Timestamp) -> Self {
        Self {
            tag: tag.into(),
            every: None,
            attempts: 0,
            next_attempt_at: at,
        }
    }

    pub fn periodic(tag: impl Into<String>, every: Duration, first_at: Timestamp) -> Self {
        Self {
            tag: tag.into(),
            every: Some(every),
            attempts: 0,
            next_attempt_at: first_at,
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.every.is_some()
    }
}

/// Persisted store of deferred collection jobs.
#[async_trait]
pub trait RetryQueue: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Inserts or replaces the job with the same tag.
    async fn upsert(&self, job: SyncJob) -> Result<(), Self::Error>;
    async fn get(&self, tag: &str) -> Result<Option<SyncJob>, Self::Error>;
    async fn remove(&self, tag: &str) -> Result<(), Self::Error>;
    /// Jobs with `next_attempt_at <= now`, earliest first.
    async fn due(&self, now: Timestamp) -> Result<Vec<SyncJob>, Self::Error>;
    async fn len(&self) -> Result<usize, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Retryable failures tolerated before a job gives up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60 * 60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the failures recorded so far.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempts))
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(100),
            max_attempts: 5,
        };

        assert_eq!(policy.backoff(0), Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(20));
        assert_eq!(policy.backoff(3), Duration::from_secs(80));
        assert_eq!(policy.backoff(4), Duration::from_secs(100));
        assert_eq!(policy.backoff(40), Duration::from_secs(100));
    }
}
