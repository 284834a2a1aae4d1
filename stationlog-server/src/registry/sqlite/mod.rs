mod device;
mod reading;
mod session;

use std::str::FromStr;

use sqlx::{
    QueryBuilder, Sqlite, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use ulid::Ulid;

pub use device::SqliteDeviceRegistry;
pub use reading::SqliteReadingRegistry;
pub use session::SqliteSessionRegistry;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SqliteRegistryError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid charging type: {0}")]
    InvalidChargingType(i64),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("invalid raw payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

/// Opens (creating if needed) the database at `path` and applies migrations.
pub async fn connect(path: impl AsRef<str>) -> Result<SqlitePool, SqliteRegistryError> {
    let options =
        SqliteConnectOptions::from_str(&format!("sqlite:{}", path.as_ref()))?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

pub async fn connect_in_memory() -> Result<SqlitePool, SqliteRegistryError> {
    let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

fn parse_ulid(value: String) -> Result<Ulid, SqliteRegistryError> {
    Ulid::from_str(&value).map_err(|_| SqliteRegistryError::InvalidUlid(value))
}

fn parse_timestamp(millis: i64) -> Result<jiff::Timestamp, SqliteRegistryError> {
    jiff::Timestamp::from_millisecond(millis).map_err(|_| SqliteRegistryError::InvalidTimestamp(millis))
}

/// Pushes ` WHERE ` before the first condition and ` AND ` before the rest.
struct Conditions {
    has_where: bool,
}

impl Conditions {
    fn new() -> Self {
        Self { has_where: false }
    }

    fn next(&mut self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if self.has_where {
            qb.push(" AND ");
        } else {
            qb.push(" WHERE ");
            self.has_where = true;
        }
    }
}

/// `column IN (...)`; an empty set matches nothing.
fn push_in<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    column: &str,
    values: impl IntoIterator<Item = String>,
) {
    let values: Vec<String> = values.into_iter().collect();
    if values.is_empty() {
        qb.push("1 = 0");
        return;
    }

    qb.push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

fn sql_limit(limit: usize) -> i64 {
    // SQLite treats a negative LIMIT as unbounded.
    i64::try_from(limit).unwrap_or(-1)
}
