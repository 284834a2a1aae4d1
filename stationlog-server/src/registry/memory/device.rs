use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stationlog_core::{Device, DeviceId};
use tokio::sync::RwLock;

use crate::registry::{
    DeviceRegistry,
    filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder},
};

use super::InMemoryError;

#[derive(Clone, Default)]
pub struct InMemoryDeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    type Error = InMemoryError;

    async fn register(&self, device: Device) -> Result<(), Self::Error> {
        let mut devices = self.devices.write().await;

        if devices
            .values()
            .any(|d| d.serial == device.serial && d.id != device.id)
        {
            return Err(InMemoryError::SerialTaken(device.serial.to_string()));
        }

        devices.insert(device.id, device);
        Ok(())
    }

    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error> {
        Ok(self.devices.read().await.get(&id).cloned())
    }

    async fn get_by_serial(&self, serial: &str) -> Result<Option<Device>, Self::Error> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .find(|d| &*d.serial == serial)
            .cloned())
    }

    async fn update(&self, id: DeviceId, new: Device) -> Result<(), Self::Error> {
        let mut devices = self.devices.write().await;
        let slot = devices.get_mut(&id).ok_or(InMemoryError::NotFound)?;
        *slot = Device { id, ..new };
        Ok(())
    }

    async fn count(&self, filter: Option<DeviceFilter>) -> Result<usize, Self::Error> {
        let devices = self.devices.read().await;

        if let Some(filter) = filter {
            return Ok(filter_devices(&devices, &filter).count());
        }

        Ok(devices.len())
    }

    async fn list(
        &self,
        options: QueryOptions<DeviceFilter, DeviceSortBy>,
    ) -> Result<Vec<Device>, Self::Error> {
        let devices = self.devices.read().await;
        let filtered: Vec<&Device> = filter_devices(&devices, &options.filter).collect();
        let sorted = sort_devices(filtered, &options.sort_by, &options.sort_order);

        let Pagination::Offset { offset, limit } = options.pagination;
        Ok(sorted.into_iter().skip(offset).take(limit).cloned().collect())
    }
}

fn sort_devices<'a>(
    mut devices: Vec<&'a Device>,
    sort_by: &DeviceSortBy,
    sort_order: &SortOrder,
) -> Vec<&'a Device> {
    devices.sort_by(|a, b| {
        let ord = match sort_by {
            DeviceSortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            DeviceSortBy::Name => a.name.cmp(&b.name),
            DeviceSortBy::Serial => a.serial.cmp(&b.serial),
        }
        .then_with(|| a.id.cmp(&b.id));

        match sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    devices
}

fn filter_devices<'a>(
    devices: &'a HashMap<DeviceId, Device>,
    filter: &DeviceFilter,
) -> impl Iterator<Item = &'a Device> {
    devices.values().filter(|device| {
        if let Some(ids) = &filter.ids
            && !ids.contains(&device.id)
        {
            return false;
        }

        if let Some(serials) = &filter.serials
            && !serials.iter().any(|s| **s == *device.serial)
        {
            return false;
        }

        if let Some(owner) = filter.owner
            && device.owner != owner
        {
            return false;
        }

        if let Some(active) = filter.active
            && device.active != active
        {
            return false;
        }

        if let Some(backup) = filter.backup_enabled
            && device.backup_enabled != backup
        {
            return false;
        }

        true
    })
}
