use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};
use stationlog_core::{Device, DeviceId, UserId};

use crate::registry::{
    DeviceRegistry,
    filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder},
};

use super::{
    Conditions, SqliteRegistryError, connect, connect_in_memory, parse_timestamp, parse_ulid,
    push_in, sql_limit,
};

#[derive(Clone)]
pub struct SqliteDeviceRegistry {
    pool: SqlitePool,
}

impl SqliteDeviceRegistry {
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

const SELECT_DEVICES: &str =
    "SELECT id, serial, name, kind, owner_id, active, backup_enabled, created_at FROM devices";

#[async_trait]
impl DeviceRegistry for SqliteDeviceRegistry {
    type Error = SqliteRegistryError;

    async fn register(&self, device: Device) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, serial, name, kind, owner_id, active, backup_enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                serial = excluded.serial,
                name = excluded.name,
                kind = excluded.kind,
                owner_id = excluded.owner_id,
                active = excluded.active,
                backup_enabled = excluded.backup_enabled
            "#,
        )
        .bind(device.id.0.to_string())
        .bind(&*device.serial)
        .bind(&*device.name)
        .bind(&*device.kind)
        .bind(device.owner.0.to_string())
        .bind(device.active)
        .bind(device.backup_enabled)
        .bind(device.created_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: DeviceId) -> Result<Option<Device>, Self::Error> {
        let row = sqlx::query(&format!("{SELECT_DEVICES} WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_row_to_device(&r)).transpose()
    }

    async fn get_by_serial(&self, serial: &str) -> Result<Option<Device>, Self::Error> {
        let row = sqlx::query(&format!("{SELECT_DEVICES} WHERE serial = ?"))
            .bind(serial)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_row_to_device(&r)).transpose()
    }

    async fn update(&self, id: DeviceId, new: Device) -> Result<(), Self::Error> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET serial = ?, name = ?, kind = ?, owner_id = ?, active = ?, backup_enabled = ?
            WHERE id = ?
            "#,
        )
        .bind(&*new.serial)
        .bind(&*new.name)
        .bind(&*new.kind)
        .bind(new.owner.0.to_string())
        .bind(new.active)
        .bind(new.backup_enabled)
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SqliteRegistryError::NotFound);
        }

        Ok(())
    }

    async fn count(&self, filter: Option<DeviceFilter>) -> Result<usize, Self::Error> {
        let mut query_builder = QueryBuilder::new("SELECT COUNT(*) FROM devices");

        if let Some(filter) = filter {
            filter_devices(&mut query_builder, filter);
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
        options: QueryOptions<DeviceFilter, DeviceSortBy>,
    ) -> Result<Vec<Device>, Self::Error> {
        let mut query_builder = QueryBuilder::new(SELECT_DEVICES);

        filter_devices(&mut query_builder, options.filter);

        query_builder.push(match options.sort_by {
            DeviceSortBy::CreatedAt => " ORDER BY created_at",
            DeviceSortBy::Name => " ORDER BY name",
            DeviceSortBy::Serial => " ORDER BY serial",
        });

        query_builder.push(match options.sort_order {
            SortOrder::Asc => " ASC, id ASC",
            SortOrder::Desc => " DESC, id DESC",
        });

        let Pagination::Offset { offset, limit } = options.pagination;
        query_builder.push(" LIMIT ").push_bind(sql_limit(limit));
        query_builder.push(" OFFSET ").push_bind(offset as i64);

        let rows = query_builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(map_row_to_device).collect()
    }
}

fn map_row_to_device(r: &SqliteRow) -> Result<Device, SqliteRegistryError> {
    let id = parse_ulid(r.try_get("id")?)?;
    let owner = parse_ulid(r.try_get("owner_id")?)?;

    Ok(Device {
        id: DeviceId(id),
        serial: r.try_get::<String, _>("serial")?.into_boxed_str(),
        name: r.try_get::<String, _>("name")?.into_boxed_str(),
        kind: r.try_get::<String, _>("kind")?.into_boxed_str(),
        owner: UserId(owner),
        active: r.try_get("active")?,
        backup_enabled: r.try_get("backup_enabled")?,
        created_at: parse_timestamp(r.try_get("created_at")?)?,
    })
}

fn filter_devices(query_builder: &mut QueryBuilder<'_, Sqlite>, filter: DeviceFilter) {
    let mut conditions = Conditions::new();

    if let Some(ids) = filter.ids {
        conditions.next(query_builder);
        push_in(query_builder, "id", ids.into_iter().map(|id| id.0.to_string()));
    }

    if let Some(serials) = filter.serials {
        conditions.next(query_builder);
        push_in(query_builder, "serial", serials);
    }

    if let Some(owner) = filter.owner {
        conditions.next(query_builder);
        query_builder
            .push("owner_id = ")
            .push_bind(owner.0.to_string());
    }

    if let Some(active) = filter.active {
        conditions.next(query_builder);
        query_builder.push("active = ").push_bind(active);
    }

    if let Some(backup) = filter.backup_enabled {
        conditions.next(query_builder);
        query_builder.push("backup_enabled = ").push_bind(backup);
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use stationlog_core::{Device, DeviceId, UserId};
    use ulid::Ulid;

    use crate::registry::DeviceRegistry;
    use crate::registry::filter::{DeviceFilter, DeviceSortBy, Pagination, QueryOptions, SortOrder};

    use super::{SqliteDeviceRegistry, SqliteRegistryError};

    fn mock_device(serial: &str, owner: UserId, created_second: i64) -> Device {
        Device {
            id: DeviceId(Ulid::new()),
            serial: serial.into(),
            name: format!("Station {serial}").into(),
            kind: "RIVER 2".into(),
            owner,
            active: true,
            backup_enabled: false,
            created_at: Timestamp::from_second(created_second).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = SqliteDeviceRegistry::new_in_memory().await.unwrap();
        let device = mock_device("R351", UserId(Ulid::new()), 1_700_000_000);

        registry.register(device.clone()).await.unwrap();

        let fetched = registry.get(device.id).await.unwrap().unwrap();
        assert_eq!(fetched, device);

        let by_serial = registry.get_by_serial("R351").await.unwrap().unwrap();
        assert_eq!(by_serial.id, device.id);
    }

    #[tokio::test]
    async fn test_duplicate_serial_rejected() {
        let registry = SqliteDeviceRegistry::new_in_memory().await.unwrap();
        let owner = UserId(Ulid::new());

        registry
            .register(mock_device("R351", owner, 1))
            .await
            .unwrap();
        let err = registry.register(mock_device("R351", owner, 2)).await;

        assert!(matches!(err, Err(SqliteRegistryError::Sqlx(_))));
    }

    #[tokio::test]
    async fn test_update_and_filter() {
        let registry = SqliteDeviceRegistry::new_in_memory().await.unwrap();
        let owner = UserId(Ulid::new());
        let device = mock_device("R351", owner, 1);
        registry.register(device.clone()).await.unwrap();
        registry
            .register(mock_device("R352", owner, 2))
            .await
            .unwrap();

        registry
            .update(
                device.id,
                Device {
                    backup_enabled: true,
                    active: false,
                    ..device.clone()
                },
            )
            .await
            .unwrap();

        let backup = DeviceFilter::builder().backup_enabled(true).build();
        assert_eq!(registry.count(Some(backup)).await.unwrap(), 1);

        let active = DeviceFilter::builder().owner(owner).active(true).build();
        assert_eq!(registry.count(Some(active)).await.unwrap(), 1);

        let missing = mock_device("R999", owner, 3);
        let err = registry.update(missing.id, missing).await;
        assert!(matches!(err, Err(SqliteRegistryError::NotFound)));
    }

    #[tokio::test]
    async fn test_empty_id_filter_matches_nothing() {
        let registry = SqliteDeviceRegistry::new_in_memory().await.unwrap();
        registry
            .register(mock_device("R351", UserId(Ulid::new()), 1))
            .await
            .unwrap();

        let filter = DeviceFilter::builder().ids([]).build();
        assert_eq!(registry.count(Some(filter)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_sorting_and_pagination() {
        let registry = SqliteDeviceRegistry::new_in_memory().await.unwrap();
        let owner = UserId(Ulid::new());

        registry.register(mock_device("B", owner, 300)).await.unwrap();
        registry.register(mock_device("A", owner, 100)).await.unwrap();
        registry.register(mock_device("C", owner, 200)).await.unwrap();

        let results = registry
            .list(QueryOptions {
                filter: DeviceFilter::builder().owner(owner).build(),
                sort_by: DeviceSortBy::CreatedAt,
                sort_order: SortOrder::Desc,
                pagination: Pagination::Offset {
                    offset: 0,
                    limit: 2,
                },
            })
            .await
            .unwrap();

        let serials: Vec<&str> = results.iter().map(|d| &*d.serial).collect();
        assert_eq!(serials, ["B", "C"]);
    }
}
