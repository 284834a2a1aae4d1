use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use jiff::Timestamp;
use stationlog_core::Granularity;
use stationlog_vendor::VendorApi;

use crate::AppState;
use crate::aggregate::{DEFAULT_LIMIT, HistoryQuery, resolve_window};
use crate::registry::{DeviceRegistry, ReadingRegistry, SessionRegistry};

use super::auth::authenticate;
use super::error::ApiError;
use super::models::{HistoryParams, HistoryResponse, parse_device_id};

impl HistoryParams {
    pub fn into_query(self, now: Timestamp) -> Result<HistoryQuery, ApiError> {
        let (start, end) = resolve_window(
            self.time_range.as_deref(),
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            now,
        )?;

        let granularity = match self.aggregation.as_deref() {
            Some(value) => value.parse()?,
            None => Granularity::Raw,
        };

        let device_id = self.device_id.as_deref().map(parse_device_id).transpose()?;

        Ok(HistoryQuery {
            device_id,
            start,
            end,
            granularity,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        })
    }
}

// Historical readings, raw or bucketed, with summary statistics
pub async fn history_readings<D, R, S, V>(
    State(state): State<AppState<D, R, S, V>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
    S: SessionRegistry,
    V: VendorApi,
{
    let caller = authenticate(&state.sessions, &headers).await?;
    let query = params.into_query(Timestamp::now())?;

    let history = state.aggregation.query(caller, &query).await?;

    Ok(Json(history.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_last_day_raw() {
        let now = Timestamp::from_second(1_717_236_000).unwrap();
        let query = HistoryParams::default().into_query(now).unwrap();

        assert_eq!(query.granularity, Granularity::Raw);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.end, now);
        assert_eq!(now.duration_since(query.start).as_hours(), 24);
    }

    #[test]
    fn rejects_bad_parameters() {
        let now = Timestamp::now();

        let bad_granularity = HistoryParams {
            aggregation: Some("15m".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_granularity.into_query(now),
            Err(ApiError::BadRequest(_))
        ));

        let bad_id = HistoryParams {
            device_id: Some("not-a-ulid".into()),
            ..Default::default()
        };
        assert!(matches!(bad_id.into_query(now), Err(ApiError::BadRequest(_))));
    }
}
