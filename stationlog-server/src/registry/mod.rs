pub mod filter;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use stationlog_core::{Device, DeviceId, Reading, UserId};

use filter::{DeviceFilter, DeviceSortBy, QueryOptions, ReadingFilter, ReadingSortBy};

#[async_trait]
pub trait DeviceRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn register(&self, device: Device) -> Result<(), Self::Error>;
    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error>;
    async fn get_by_serial(&self, serial: &str) -> Result<Option<Device>, Self::Error>;
    async fn update(&self, id: DeviceId, new: Device) -> Result<(), Self::Error>;
    async fn count(&self, filter: Option<DeviceFilter>) -> Result<usize, Self::Error>;
    async fn list(
        &self,
        options: QueryOptions<DeviceFilter, DeviceSortBy>,
    ) -> Result<Vec<Device>, Self::Error>;
}

/// Append-only store of telemetry samples.
#[async_trait]
pub trait ReadingRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persists a new reading. Existing readings are never overwritten.
    async fn store(&self, reading: Reading) -> Result<(), Self::Error>;
    async fn count(&self, filter: Option<ReadingFilter>) -> Result<usize, Self::Error>;
    async fn list(
        &self,
        options: QueryOptions<ReadingFilter, ReadingSortBy>,
    ) -> Result<Vec<Reading>, Self::Error>;
    /// Most recent reading of `device` by timestamp.
    async fn latest(&self, device: DeviceId) -> Result<Option<Reading>, Self::Error>;
}

/// Maps opaque session cookies to the account they were issued for.
///
/// Sessions are issued elsewhere; this registry only stores the mapping.
#[async_trait]
pub trait SessionRegistry: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn insert(&self, token: &str, user: UserId) -> Result<(), Self::Error>;
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, Self::Error>;
}
