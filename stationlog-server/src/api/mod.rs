pub mod auth;
pub mod collect;
pub mod devices;
pub mod error;
pub mod history;
pub mod models;

use axum::{
    Router,
    routing::{get, post},
};
use stationlog_vendor::VendorApi;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::registry::{DeviceRegistry, ReadingRegistry, SessionRegistry};

pub fn router<D, R, S, V>() -> Router<AppState<D, R, S, V>>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
    V: VendorApi,
{
    Router::new()
        .route("/health", get(health))
        // Ingestion
        .route("/collect-readings", post(collect::collect_device))
        .route("/collect-readings/self", post(collect::collect_self))
        // Devices
        .route("/devices", get(devices::list_devices))
        .route("/devices/sync", post(devices::sync_devices))
        // History
        .route("/history/readings", get(history::history_readings))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}
