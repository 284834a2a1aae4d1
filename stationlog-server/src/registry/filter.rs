use stationlog_core::{DeviceId, UserId};

pub enum DeviceSortBy {
    CreatedAt,
    Name,
    Serial,
}

/// Readings are only ever listed chronologically.
pub enum ReadingSortBy {
    Timestamp,
}

pub enum SortOrder {
    Asc,
    Desc,
}

pub enum Pagination {
    Offset { offset: usize, limit: usize },
}

impl Pagination {
    pub fn all() -> Self {
        Pagination::Offset {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

pub struct QueryOptions<F, S> {
    pub filter: F,
    pub sort_by: S,
    pub sort_order: SortOrder,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub ids: Option<Vec<DeviceId>>,
    pub serials: Option<Vec<String>>,
    pub owner: Option<UserId>,
    pub active: Option<bool>,
    pub backup_enabled: Option<bool>,
}

impl DeviceFilter {
    pub fn builder() -> DeviceFilterBuilder {
        DeviceFilterBuilder::new()
    }
}

#[derive(Default)]
pub struct DeviceFilterBuilder {
    filter: DeviceFilter,
}

impl DeviceFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        self.filter.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn serials<I, S>(mut self, serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.serials = Some(serials.into_iter().map(Into::into).collect());
        self
    }

    pub fn owner(mut self, owner: UserId) -> Self {
        self.filter.owner = Some(owner);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.filter.active = Some(active);
        self
    }

    pub fn backup_enabled(mut self, enabled: bool) -> Self {
        self.filter.backup_enabled = Some(enabled);
        self
    }

    pub fn build(self) -> DeviceFilter {
        self.filter
    }
}

/// Bounds are inclusive on both ends.
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_ids: Option<Vec<DeviceId>>,
    pub timestamp_after: Option<jiff::Timestamp>,
    pub timestamp_before: Option<jiff::Timestamp>,
}

impl ReadingFilter {
    pub fn for_devices<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        Self {
            device_ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: jiff::Timestamp, end: jiff::Timestamp) -> Self {
        self.timestamp_after = Some(start);
        self.timestamp_before = Some(end);
        self
    }
}
