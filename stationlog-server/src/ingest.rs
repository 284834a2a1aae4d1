//! Authorized ingestion of vendor quota snapshots into reading rows.
//!
//! Every trigger source (foreground scheduler, background fallback, daily
//! backup) ends up here. Concurrent calls for the same device are not
//! deduplicated: each produces its own row.

use std::sync::Arc;

use jiff::Timestamp;
use stationlog_core::{Device, DeviceId, IngestSummary, Reading, UserId};
use stationlog_vendor::{QuotaMap, VendorApi, VendorError, transform_quota_to_reading};
use tracing::{info, instrument, warn};
use ulid::Ulid;

use crate::registry::{
    DeviceRegistry, ReadingRegistry,
    filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The caller does not own the device, or the device does not exist.
    #[error("user {caller} is not authorized for device {device_id}")]
    Authorization { caller: UserId, device_id: DeviceId },

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
}

impl IngestError {
    fn storage(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        IngestError::Storage(Box::new(error))
    }

    /// Whether a later attempt could succeed without the request changing.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Authorization { .. } => false,
            IngestError::Vendor(e) => e.is_server_class(),
            IngestError::Storage(_) => true,
        }
    }
}

pub struct IngestionService<D, R, V> {
    devices: D,
    readings: R,
    vendor: Arc<V>,
}

impl<D: Clone, R: Clone, V> Clone for IngestionService<D, R, V> {
    fn clone(&self) -> Self {
        Self {
            devices: self.devices.clone(),
            readings: self.readings.clone(),
            vendor: Arc::clone(&self.vendor),
        }
    }
}

impl<D, R, V> IngestionService<D, R, V>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    V: VendorApi,
{
    pub fn new(devices: D, readings: R, vendor: Arc<V>) -> Self {
        Self {
            devices,
            readings,
            vendor,
        }
    }

    /// Collects one reading for `device_id` on behalf of `caller`.
    ///
    /// Uses `quota` when the caller already fetched a snapshot, otherwise
    /// asks the vendor. Nothing is written unless the whole path succeeds.
    #[instrument(skip_all, fields(%caller, %device_id))]
    pub async fn ingest(
        &self,
        caller: UserId,
        device_id: DeviceId,
        quota: Option<QuotaMap>,
    ) -> Result<Reading, IngestError> {
        let device = self
            .devices
            .get(device_id)
            .await
            .map_err(IngestError::storage)?
            .filter(|device| device.owner == caller)
            .ok_or(IngestError::Authorization { caller, device_id })?;

        let quota = match quota {
            Some(quota) => quota,
            None => self.vendor.device_quota(&device.serial).await?,
        };

        let reading = transform_quota_to_reading(&quota, device.id);
        self.readings
            .store(reading.clone())
            .await
            .map_err(IngestError::storage)?;

        info!(
            reading_id = %reading.id,
            status = %reading.status,
            battery = ?reading.battery_level,
            "reading stored"
        );

        Ok(reading)
    }

    /// Collects every active device owned by `caller`.
    ///
    /// Per-device failures are counted as skipped. When nothing could be
    /// imported and at least one failure is retryable, the first retryable
    /// error is returned instead so the caller's retry policy kicks in.
    pub async fn ingest_owned(&self, caller: UserId) -> Result<IngestSummary, IngestError> {
        let devices = self
            .devices
            .list(QueryOptions {
                filter: DeviceFilter::builder().owner(caller).active(true).build(),
                sort_by: DeviceSortBy::CreatedAt,
                sort_order: SortOrder::Asc,
                pagination: Pagination::all(),
            })
            .await
            .map_err(IngestError::storage)?;

        let mut summary = IngestSummary::default();
        let mut first_retryable = None;

        for device in devices {
            match self.ingest(caller, device.id, None).await {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!(device_id = %device.id, serial = %device.serial, error = %e, "collection failed");
                    summary.skipped += 1;
                    if first_retryable.is_none() && e.is_retryable() {
                        first_retryable = Some(e);
                    }
                }
            }
        }

        if summary.imported == 0
            && let Some(e) = first_retryable
        {
            return Err(e);
        }

        info!(%caller, imported = summary.imported, skipped = summary.skipped, "bulk collection finished");
        Ok(summary)
    }

    /// Registers vendor devices that are not yet known, owned by `caller`.
    ///
    /// Serials already registered (to anyone) are counted as skipped.
    pub async fn sync_devices(&self, caller: UserId) -> Result<IngestSummary, IngestError> {
        let listed = self.vendor.device_list().await?;
        let mut summary = IngestSummary::default();

        for vendor_device in listed {
            let known = self
                .devices
                .get_by_serial(&vendor_device.sn)
                .await
                .map_err(IngestError::storage)?;

            if known.is_some() {
                summary.skipped += 1;
                continue;
            }

            let device = Device {
                id: DeviceId(Ulid::new()),
                name: vendor_device
                    .device_name
                    .clone()
                    .unwrap_or_else(|| vendor_device.sn.clone())
                    .into_boxed_str(),
                kind: vendor_device
                    .product_name
                    .clone()
                    .unwrap_or_default()
                    .into_boxed_str(),
                serial: vendor_device.sn.into_boxed_str(),
                owner: caller,
                active: true,
                backup_enabled: false,
                created_at: Timestamp::now(),
            };

            info!(device_id = %device.id, serial = %device.serial, "registering vendor device");
            self.devices
                .register(device)
                .await
                .map_err(IngestError::storage)?;
            summary.imported += 1;
        }

        Ok(summary)
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn readings(&self) -> &R {
        &self.readings
    }
}
