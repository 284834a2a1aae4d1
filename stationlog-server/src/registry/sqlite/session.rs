use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use stationlog_core::UserId;

use crate::registry::SessionRegistry;

use super::{SqliteRegistryError, connect, connect_in_memory, parse_ulid};

#[derive(Clone)]
pub struct SqliteSessionRegistry {
    pool: SqlitePool,
}

impl SqliteSessionRegistry {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect(path).await?))
    }

    pub async fn new_in_memory() -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect_in_memory().await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRegistry for SqliteSessionRegistry {
    type Error = SqliteRegistryError;

    async fn insert(&self, token: &str, user: UserId) -> Result<(), Self::Error> {
        sqlx::query("INSERT OR REPLACE INTO sessions (token, user_id) VALUES (?, ?)")
            .bind(token)
            .bind(user.0.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn resolve(&self, token: &str) -> Result<Option<UserId>, Self::Error> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(UserId(parse_ulid(row.try_get("user_id")?)?)))
    }
}

#[cfg(test)]
mod tests {
    use stationlog_core::UserId;
    use ulid::Ulid;

    use crate::registry::SessionRegistry;

    use super::SqliteSessionRegistry;

    #[tokio::test]
    async fn test_insert_and_resolve() {
        let registry = SqliteSessionRegistry::new_in_memory().await.unwrap();
        let first = UserId(Ulid::new());
        let second = UserId(Ulid::new());

        registry.insert("token", first).await.unwrap();
        assert_eq!(registry.resolve("token").await.unwrap(), Some(first));

        registry.insert("token", second).await.unwrap();
        assert_eq!(registry.resolve("token").await.unwrap(), Some(second));

        assert_eq!(registry.resolve("unknown").await.unwrap(), None);
    }
}
