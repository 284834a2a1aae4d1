use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};
use stationlog_core::{ChargingType, DeviceId, Reading, ReadingId, StationStatus};

use crate::registry::{
    ReadingRegistry,
    filter::{Pagination, QueryOptions, ReadingFilter, ReadingSortBy, SortOrder},
};

use super::{
    Conditions, SqliteRegistryError, connect, connect_in_memory, parse_timestamp, parse_ulid,
    push_in, sql_limit,
};

#[derive(Clone)]
pub struct SqliteReadingRegistry {
    pool: SqlitePool,
}

impl SqliteReadingRegistry {
    pub async fn new(path: impl AsRef<str>) -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect(path).await?))
    }

    pub async fn new_in_memory() -> Result<Self, SqliteRegistryError> {
        Ok(Self::from_pool(connect_in_memory().await?))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const READING_COLUMNS: &str = "id, device_id, timestamp, battery_level, input_watts, \
    ac_input_watts, dc_input_watts, charging_type, output_watts, ac_output_watts, \
    dc_output_watts, usb_output_watts, remaining_time, temperature, status, raw";

#[async_trait]
impl ReadingRegistry for SqliteReadingRegistry {
    type Error = SqliteRegistryError;

    async fn store(&self, reading: Reading) -> Result<(), Self::Error> {
        let raw = serde_json::to_string(&reading.raw)?;

        sqlx::query(&format!(
            "INSERT INTO readings ({READING_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(reading.id.0.to_string())
        .bind(reading.device_id.0.to_string())
        .bind(reading.timestamp.as_millisecond())
        .bind(reading.battery_level)
        .bind(reading.input_watts)
        .bind(reading.ac_input_watts)
        .bind(reading.dc_input_watts)
        .bind(reading.charging_type.code())
        .bind(reading.output_watts)
        .bind(reading.ac_output_watts)
        .bind(reading.dc_output_watts)
        .bind(reading.usb_output_watts)
        .bind(reading.remaining_time)
        .bind(reading.temperature)
        .bind(reading.status.as_str())
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self, filter: Option<ReadingFilter>) -> Result<usize, Self::Error> {
        let mut query_builder = QueryBuilder::new("SELECT COUNT(*) FROM readings");

        if let Some(filter) = filter {
            filter_readings(&mut query_builder, filter);
        }

        let count: i64 = query_builder
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok(count as usize)
    }

    async fn list(
        &self,
        options: QueryOptions<ReadingFilter, ReadingSortBy>,
    ) -> Result<Vec<Reading>, Self::Error> {
        let mut query_builder = QueryBuilder::new(format!("SELECT {READING_COLUMNS} FROM readings"));

        filter_readings(&mut query_builder, options.filter);

        let ReadingSortBy::Timestamp = options.sort_by;
        query_builder.push(match options.sort_order {
            SortOrder::Asc => " ORDER BY timestamp ASC, rowid ASC",
            SortOrder::Desc => " ORDER BY timestamp DESC, rowid DESC",
        });

        let Pagination::Offset { offset, limit } = options.pagination;
        query_builder.push(" LIMIT ").push_bind(sql_limit(limit));
        query_builder.push(" OFFSET ").push_bind(offset as i64);

        let rows = query_builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(map_row_to_reading).collect()
    }

    async fn latest(&self, device: DeviceId) -> Result<Option<Reading>, Self::Error> {
        let row = sqlx::query(&format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE device_id = ? \
             ORDER BY timestamp DESC, rowid DESC LIMIT 1"
        ))
        .bind(device.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_row_to_reading(&r)).transpose()
    }
}

fn map_row_to_reading(r: &SqliteRow) -> Result<Reading, SqliteRegistryError> {
    let id = parse_ulid(r.try_get("id")?)?;
    let device_id = parse_ulid(r.try_get("device_id")?)?;

    let code: i64 = r.try_get("charging_type")?;
    let charging_type =
        ChargingType::from_code(code).ok_or(SqliteRegistryError::InvalidChargingType(code))?;

    let status: String = r.try_get("status")?;
    let status = status
        .parse::<StationStatus>()
        .map_err(|_| SqliteRegistryError::InvalidStatus(status))?;

    let raw: String = r.try_get("raw")?;

    Ok(Reading {
        id: ReadingId(id),
        device_id: DeviceId(device_id),
        timestamp: parse_timestamp(r.try_get("timestamp")?)?,
        battery_level: r.try_get("battery_level")?,
        input_watts: r.try_get("input_watts")?,
        ac_input_watts: r.try_get("ac_input_watts")?,
        dc_input_watts: r.try_get("dc_input_watts")?,
        charging_type,
        output_watts: r.try_get("output_watts")?,
        ac_output_watts: r.try_get("ac_output_watts")?,
        dc_output_watts: r.try_get("dc_output_watts")?,
        usb_output_watts: r.try_get("usb_output_watts")?,
        remaining_time: r.try_get("remaining_time")?,
        temperature: r.try_get("temperature")?,
        status,
        raw: serde_json::from_str(&raw)?,
    })
}

fn filter_readings(query_builder: &mut QueryBuilder<'_, Sqlite>, filter: ReadingFilter) {
    let mut conditions = Conditions::new();

    if let Some(device_ids) = filter.device_ids {
        conditions.next(query_builder);
        push_in(
            query_builder,
            "device_id",
            device_ids.into_iter().map(|id| id.0.to_string()),
        );
    }

    if let Some(after) = filter.timestamp_after {
        conditions.next(query_builder);
        query_builder
            .push("timestamp >= ")
            .push_bind(after.as_millisecond());
    }

    if let Some(before) = filter.timestamp_before {
        conditions.next(query_builder);
        query_builder
            .push("timestamp <= ")
            .push_bind(before.as_millisecond());
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use serde_json::json;
    use stationlog_core::{ChargingType, DeviceId, Reading, ReadingId, StationStatus};
    use tempfile::NamedTempFile;
    use ulid::Ulid;

    use crate::registry::ReadingRegistry;
    use crate::registry::filter::{Pagination, QueryOptions, ReadingFilter, ReadingSortBy, SortOrder};

    use super::SqliteReadingRegistry;

    fn mock_reading(device_id: DeviceId, millis: i64, battery: Option<f64>) -> Reading {
        Reading {
            id: ReadingId(Ulid::new()),
            device_id,
            timestamp: Timestamp::from_millisecond(millis).unwrap(),
            battery_level: battery,
            input_watts: Some(120.0),
            ac_input_watts: Some(120.0),
            dc_input_watts: Some(0.0),
            charging_type: ChargingType::Ac,
            output_watts: Some(35.5),
            ac_output_watts: Some(30.0),
            dc_output_watts: Some(0.0),
            usb_output_watts: Some(5.5),
            remaining_time: Some(42.0),
            temperature: None,
            status: StationStatus::Charging,
            raw: json!({ "pd.soc": battery }),
        }
    }

    fn chronological(filter: ReadingFilter) -> QueryOptions<ReadingFilter, ReadingSortBy> {
        QueryOptions {
            filter,
            sort_by: ReadingSortBy::Timestamp,
            sort_order: SortOrder::Asc,
            pagination: Pagination::all(),
        }
    }

    #[tokio::test]
    async fn test_store_preserves_fields() {
        let registry = SqliteReadingRegistry::new_in_memory().await.unwrap();
        let device = DeviceId(Ulid::new());
        let reading = mock_reading(device, 1_700_000_000_123, Some(81.0));

        registry.store(reading.clone()).await.unwrap();

        let listed = registry
            .list(chronological(ReadingFilter::for_devices([device])))
            .await
            .unwrap();
        assert_eq!(listed, vec![reading]);
    }

    #[tokio::test]
    async fn test_store_rejects_existing_id() {
        let registry = SqliteReadingRegistry::new_in_memory().await.unwrap();
        let reading = mock_reading(DeviceId(Ulid::new()), 1_000, None);

        registry.store(reading.clone()).await.unwrap();
        assert!(registry.store(reading).await.is_err());
        assert_eq!(registry.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_and_device_filters() {
        let registry = SqliteReadingRegistry::new_in_memory().await.unwrap();
        let device = DeviceId(Ulid::new());
        let other = DeviceId(Ulid::new());

        for millis in [4_000, 1_000, 3_000, 2_000] {
            registry
                .store(mock_reading(device, millis, Some(50.0)))
                .await
                .unwrap();
        }
        registry
            .store(mock_reading(other, 2_500, Some(50.0)))
            .await
            .unwrap();

        let window = ReadingFilter::for_devices([device]).between(
            Timestamp::from_millisecond(2_000).unwrap(),
            Timestamp::from_millisecond(3_000).unwrap(),
        );
        assert_eq!(registry.count(Some(window.clone())).await.unwrap(), 2);

        let all_device = registry
            .list(chronological(ReadingFilter::for_devices([device])))
            .await
            .unwrap();
        let millis: Vec<i64> = all_device
            .iter()
            .map(|r| r.timestamp.as_millisecond())
            .collect();
        assert_eq!(millis, [1_000, 2_000, 3_000, 4_000]);

        let none = ReadingFilter::for_devices([]);
        assert_eq!(registry.count(Some(none)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_latest_and_file_backed_persistence() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let device = DeviceId(Ulid::new());

        {
            let registry = SqliteReadingRegistry::new(&path).await.unwrap();
            registry
                .store(mock_reading(device, 5_000, Some(10.0)))
                .await
                .unwrap();
            registry
                .store(mock_reading(device, 9_000, Some(20.0)))
                .await
                .unwrap();
        }

        let reopened = SqliteReadingRegistry::new(&path).await.unwrap();
        let latest = reopened.latest(device).await.unwrap().unwrap();
        assert_eq!(latest.timestamp.as_millisecond(), 9_000);
        assert_eq!(latest.battery_level, Some(20.0));
        assert!(
            reopened
                .latest(DeviceId(Ulid::new()))
                .await
                .unwrap()
                .is_none()
        );
    }
}
