use axum::{Json, extract::State, http::HeaderMap};
use jiff::Timestamp;
use stationlog_vendor::VendorApi;

use crate::AppState;
use crate::registry::{
    DeviceRegistry, ReadingRegistry, SessionRegistry,
    filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder},
};

use super::auth::authenticate;
use super::error::ApiError;
use super::models::{DeviceListResponse, DeviceResponse, SummaryResponse};

// List the caller's devices with online state derived from the latest reading
pub async fn list_devices<D, R, S, V>(
    State(state): State<AppState<D, R, S, V>>,
    headers: HeaderMap,
) -> Result<Json<DeviceListResponse>, ApiError>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
    V: VendorApi,
{
    let caller = authenticate(&state.sessions, &headers).await?;

    let devices = state
        .devices
        .list(QueryOptions {
            filter: DeviceFilter::builder().owner(caller).build(),
            sort_by: DeviceSortBy::Name,
            sort_order: SortOrder::Asc,
            pagination: Pagination::all(),
        })
        .await
        .map_err(ApiError::storage)?;

    let now = Timestamp::now();
    let mut responses = Vec::with_capacity(devices.len());

    for device in devices {
        let latest = state
            .readings
            .latest(device.id)
            .await
            .map_err(ApiError::storage)?;
        // Online comes from the latest reading, not a heartbeat. Every status
        // value means the station answered, so freshness decides; the status
        // itself is returned as `lastStatus` next to it.
        let online = latest
            .as_ref()
            .is_some_and(|r| now.duration_since(r.timestamp) <= state.online_window);

        responses.push(DeviceResponse::new(device, latest.as_ref(), online));
    }

    Ok(Json(DeviceListResponse { devices: responses }))
}

// Register vendor devices not known yet
pub async fn sync_devices<D, R, S, V>(
    State(state): State<AppState<D, R, S, V>>,
    headers: HeaderMap,
) -> Result<Json<SummaryResponse>, ApiError>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
    V: VendorApi,
{
    let caller = authenticate(&state.sessions, &headers).await?;
    let summary = state.ingestion.sync_devices(caller).await?;

    Ok(Json(SummaryResponse { summary }))
}
