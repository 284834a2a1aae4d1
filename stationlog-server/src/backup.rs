//! Daily server-side collection for devices that opted into backup.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stationlog_core::{ValidationError, nonzero_interval};
use stationlog_vendor::VendorApi;

use crate::ingest::{IngestError, IngestionService};
use crate::registry::{
    DeviceRegistry, ReadingRegistry,
    filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupTally {
    pub total: u32,
    pub success: u32,
    pub errors: u32,
}

pub struct BackupScheduler<D, R, V> {
    ingestion: IngestionService<D, R, V>,
    interval: Duration,
}

impl<D, R, V> BackupScheduler<D, R, V>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    V: VendorApi,
{
    pub fn new(
        ingestion: IngestionService<D, R, V>,
        interval: Duration,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            ingestion,
            interval: nonzero_interval("backup interval", interval)?,
        })
    }

    /// Runs a batch every `interval` until `cancel` fires.
    ///
    /// The first batch runs one full interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Backup scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Backup scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_batch().await {
                        Ok(tally) => info!(
                            total = tally.total,
                            success = tally.success,
                            errors = tally.errors,
                            "Backup batch finished"
                        ),
                        Err(e) => error!(error = %e, "Backup batch could not list devices"),
                    }
                }
            }
        }
    }

    /// Collects one reading for every backup-enabled device.
    ///
    /// Each device is ingested on behalf of its owner. A failing device is
    /// counted and does not stop the batch.
    pub async fn run_batch(&self) -> Result<BackupTally, IngestError> {
        let devices = self
            .ingestion
            .devices()
            .list(QueryOptions {
                filter: DeviceFilter::builder().backup_enabled(true).build(),
                sort_by: DeviceSortBy::CreatedAt,
                sort_order: SortOrder::Asc,
                pagination: Pagination::all(),
            })
            .await
            .map_err(|e| IngestError::Storage(Box::new(e)))?;

        let mut tally = BackupTally::default();

        for device in devices {
            tally.total += 1;
            match self.ingestion.ingest(device.owner, device.id, None).await {
                Ok(_) => tally.success += 1,
                Err(e) => {
                    warn!(device_id = %device.id, serial = %device.serial, error = %e, "Backup collection failed");
                    tally.errors += 1;
                }
            }
        }

        Ok(tally)
    }
}
