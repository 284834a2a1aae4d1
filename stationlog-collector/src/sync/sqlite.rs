use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::{
    Row, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use super::queue::{RetryQueue, SyncJob};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SqliteQueueError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid value in column {0}")]
    InvalidColumn(&'static str),
}

/// Queue persisted in SQLite so pending jobs survive restarts.
#[derive(Clone)]
pub struct SqliteRetryQueue {
    pool: SqlitePool,
}

impl SqliteRetryQueue {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteQueueError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.as_ref()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteQueueError> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

const SELECT_JOBS: &str = "SELECT tag, every_ms, attempts, next_attempt_at FROM sync_jobs";

#[async_trait]
impl RetryQueue for SqliteRetryQueue {
    type Error = SqliteQueueError;

    async fn upsert(&self, job: SyncJob) -> Result<(), Self::Error> {
        let every_ms = job
            .every
            .map(|every| i64::try_from(every.as_millis()))
            .transpose()
            .map_err(|_| SqliteQueueError::InvalidColumn("every_ms"))?;

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (tag, every_ms, attempts, next_attempt_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tag) DO UPDATE SET
                every_ms = excluded.every_ms,
                attempts = excluded.attempts,
                next_attempt_at = excluded.next_attempt_at
            "#,
        )
        .bind(&job.tag)
        .bind(every_ms)
        .bind(i64::from(job.attempts))
        .bind(job.next_attempt_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, tag: &str) -> Result<Option<SyncJob>, Self::Error> {
        let row = sqlx::query(&format!("{SELECT_JOBS} WHERE tag = ?"))
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_row_to_job(&r)).transpose()
    }

    async fn remove(&self, tag: &str) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM sync_jobs WHERE tag = ?")
            .bind(tag)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn due(&self, now: Timestamp) -> Result<Vec<SyncJob>, Self::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_JOBS} WHERE next_attempt_at <= ? ORDER BY next_attempt_at ASC, tag ASC"
        ))
        .bind(now.as_millisecond())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_job).collect()
    }

    async fn len(&self) -> Result<usize, Self::Error> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM sync_jobs")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok(count as usize)
    }
}

fn map_row_to_job(r: &SqliteRow) -> Result<SyncJob, SqliteQueueError> {
    let every_ms: Option<i64> = r.try_get("every_ms")?;
    let every = every_ms
        .map(|ms| u64::try_from(ms).map(Duration::from_millis))
        .transpose()
        .map_err(|_| SqliteQueueError::InvalidColumn("every_ms"))?;

    let attempts: i64 = r.try_get("attempts")?;
    let attempts =
        u32::try_from(attempts).map_err(|_| SqliteQueueError::InvalidColumn("attempts"))?;

    let millis: i64 = r.try_get("next_attempt_at")?;
    let next_attempt_at =
        Timestamp::from_millisecond(millis).map_err(|_| SqliteQueueError::InvalidTimestamp(millis))?;

    Ok(SyncJob {
        tag: r.try_get("tag")?,
        every,
        attempts,
        next_attempt_at,
    })
}
