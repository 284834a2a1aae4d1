pub mod aggregate;
pub mod api;
pub mod backup;
pub mod config;
pub mod ingest;
pub mod registry;

use std::sync::Arc;

use aggregate::AggregationEngine;
use ingest::IngestionService;

pub use config::{Config, RegistryConfig};

// AppState lives here so both the API and the binary can name it.
pub struct AppState<D, R, S, V> {
    pub devices: D,
    pub readings: R,
    pub sessions: S,
    pub ingestion: IngestionService<D, R, V>,
    pub aggregation: AggregationEngine<D, R>,
    /// A device counts as online while its latest reading is younger than this.
    pub online_window: jiff::SignedDuration,
}

impl<D: Clone, R: Clone, S: Clone, V> Clone for AppState<D, R, S, V> {
    fn clone(&self) -> Self {
        Self {
            devices: self.devices.clone(),
            readings: self.readings.clone(),
            sessions: self.sessions.clone(),
            ingestion: self.ingestion.clone(),
            aggregation: self.aggregation.clone(),
            online_window: self.online_window,
        }
    }
}

impl<D, R, S, V> AppState<D, R, S, V>
where
    D: registry::DeviceRegistry,
    R: registry::ReadingRegistry,
    S: registry::SessionRegistry,
    V: stationlog_vendor::VendorApi,
{
    pub fn new(
        devices: D,
        readings: R,
        sessions: S,
        vendor: Arc<V>,
        online_window: jiff::SignedDuration,
    ) -> Self {
        Self {
            ingestion: IngestionService::new(devices.clone(), readings.clone(), vendor),
            aggregation: AggregationEngine::new(devices.clone(), readings.clone()),
            devices,
            readings,
            sessions,
            online_window,
        }
    }
}
