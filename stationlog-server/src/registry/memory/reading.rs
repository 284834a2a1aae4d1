use std::sync::Arc;

use async_trait::async_trait;
use stationlog_core::{DeviceId, Reading};
use tokio::sync::RwLock;

use crate::registry::{
    ReadingRegistry,
    filter::{Pagination, QueryOptions, ReadingFilter, ReadingSortBy, SortOrder},
};

use super::InMemoryError;

#[derive(Clone, Default)]
pub struct InMemoryReadingRegistry {
    readings: Arc<RwLock<Vec<Reading>>>,
}

impl InMemoryReadingRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingRegistry for InMemoryReadingRegistry {
    type Error = InMemoryError;

    async fn store(&self, reading: Reading) -> Result<(), Self::Error> {
        let mut readings = self.readings.write().await;

        if readings.iter().any(|r| r.id == reading.id) {
            return Err(InMemoryError::Duplicate(reading.id.to_string()));
        }

        readings.push(reading);
        Ok(())
    }

    async fn count(&self, filter: Option<ReadingFilter>) -> Result<usize, Self::Error> {
        let readings = self.readings.read().await;

        if let Some(filter) = filter {
            return Ok(readings.iter().filter(|r| matches(r, &filter)).count());
        }

        Ok(readings.len())
    }

    async fn list(
        &self,
        options: QueryOptions<ReadingFilter, ReadingSortBy>,
    ) -> Result<Vec<Reading>, Self::Error> {
        let readings = self.readings.read().await;
        let mut filtered: Vec<&Reading> = readings
            .iter()
            .filter(|r| matches(r, &options.filter))
            .collect();

        // Stable sort keeps insertion order for equal timestamps.
        let ReadingSortBy::Timestamp = options.sort_by;
        filtered.sort_by_key(|r| r.timestamp);
        if let SortOrder::Desc = options.sort_order {
            filtered.reverse();
        }

        let Pagination::Offset { offset, limit } = options.pagination;
        Ok(filtered.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn latest(&self, device: DeviceId) -> Result<Option<Reading>, Self::Error> {
        Ok(self
            .readings
            .read()
            .await
            .iter()
            .filter(|r| r.device_id == device)
            .max_by_key(|r| r.timestamp)
            .cloned())
    }
}

fn matches(reading: &Reading, filter: &ReadingFilter) -> bool {
    if let Some(ids) = &filter.device_ids
        && !ids.contains(&reading.device_id)
    {
        return false;
    }

    if let Some(after) = filter.timestamp_after
        && reading.timestamp < after
    {
        return false;
    }

    if let Some(before) = filter.timestamp_before
        && reading.timestamp > before
    {
        return false;
    }

    true
}
