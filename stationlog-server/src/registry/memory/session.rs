use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stationlog_core::UserId;
use tokio::sync::RwLock;

use crate::registry::SessionRegistry;

use super::InMemoryError;

#[derive(Clone, Default)]
pub struct InMemorySessionRegistry {
    sessions: Arc<RwLock<HashMap<String, UserId>>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    type Error = InMemoryError;

    async fn insert(&self, token: &str, user: UserId) -> Result<(), Self::Error> {
        self.sessions.write().await.insert(token.to_owned(), user);
        Ok(())
    }

    async fn resolve(&self, token: &str) -> Result<Option<UserId>, Self::Error> {
        Ok(self.sessions.read().await.get(token).copied())
    }
}
