use axum::{
    Json,
    extract::State,
    http::HeaderMap,
};
use stationlog_core::IngestSummary;
use stationlog_vendor::VendorApi;

use crate::AppState;
use crate::registry::{DeviceRegistry, ReadingRegistry, SessionRegistry};

use super::auth::authenticate;
use super::error::ApiError;
use super::models::{CollectRequest, SummaryResponse, parse_device_id};

// Collect one reading for a single owned device
pub async fn collect_device<D, R, S, V>(
    State(state): State<AppState<D, R, S, V>>,
    headers: HeaderMap,
    Json(request): Json<CollectRequest>,
) -> Result<Json<SummaryResponse>, ApiError>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
    V: VendorApi,
{
    let caller = authenticate(&state.sessions, &headers).await?;
    let device_id = parse_device_id(&request.device_id)?;

    state
        .ingestion
        .ingest(caller, device_id, request.quota)
        .await?;

    Ok(Json(SummaryResponse {
        summary: IngestSummary {
            imported: 1,
            skipped: 0,
        },
    }))
}

// Collect every active device owned by the caller
pub async fn collect_self<D, R, S, V>(
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
    let summary = state.ingestion.ingest_owned(caller).await?;

    Ok(Json(SummaryResponse { summary }))
}
