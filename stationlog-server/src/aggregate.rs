//! History queries: raw rows, fixed-width buckets and summary statistics.

use std::collections::{BTreeMap, HashMap};

use jiff::{SignedDuration, Timestamp};
use stationlog_core::{
    AggregatedBucket, Device, DeviceId, Granularity, Reading, ReadingSummary, StationStatus,
    UserId, ValidationError, bucket_start,
};

use crate::ingest::BoxError;
use crate::registry::{
    DeviceRegistry, ReadingRegistry,
    filter::{
        DeviceFilter, DeviceSortBy, Pagination, QueryOptions, ReadingFilter, ReadingSortBy,
        SortOrder,
    },
};

pub const DEFAULT_LIMIT: usize = 1000;
pub const MAX_LIMIT: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user {caller} is not authorized for device {device_id}")]
    Authorization { caller: UserId, device_id: DeviceId },

    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
}

impl QueryError {
    fn storage(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        QueryError::Storage(Box::new(error))
    }
}

/// Relative windows ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    LastHour,
    LastDay,
    LastWeek,
    LastMonth,
}

impl TimeRange {
    pub fn duration(self) -> SignedDuration {
        match self {
            TimeRange::LastHour => SignedDuration::from_hours(1),
            TimeRange::LastDay => SignedDuration::from_hours(24),
            TimeRange::LastWeek => SignedDuration::from_hours(24 * 7),
            TimeRange::LastMonth => SignedDuration::from_hours(24 * 30),
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeRange::LastHour),
            "24h" => Ok(TimeRange::LastDay),
            "7d" => Ok(TimeRange::LastWeek),
            "30d" => Ok(TimeRange::LastMonth),
            other => Err(ValidationError::UnknownTimeRange(other.to_owned())),
        }
    }
}

/// Accepts RFC 3339 or integer epoch milliseconds.
pub fn parse_timestamp(value: &str) -> Result<Timestamp, ValidationError> {
    if let Ok(millis) = value.parse::<i64>() {
        return Timestamp::from_millisecond(millis)
            .map_err(|_| ValidationError::InvalidTimestamp(value.to_owned()));
    }

    value
        .parse::<Timestamp>()
        .map_err(|_| ValidationError::InvalidTimestamp(value.to_owned()))
}

/// Resolves the query window from either explicit bounds or a preset.
///
/// Explicit bounds win over `time_range`. A lone `start` runs until `now`;
/// with nothing given the last 24 hours are used.
pub fn resolve_window(
    time_range: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    now: Timestamp,
) -> Result<(Timestamp, Timestamp), ValidationError> {
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (parse_timestamp(start)?, parse_timestamp(end)?),
        (Some(start), None) => (parse_timestamp(start)?, now),
        (None, Some(_)) => return Err(ValidationError::Missing("startDate")),
        (None, None) => {
            let range: TimeRange = time_range.unwrap_or("24h").parse()?;
            let start = now
                .checked_sub(range.duration())
                .map_err(|_| ValidationError::InvalidTimestamp(format!("{now} - {range:?}")))?;
            (start, now)
        }
    };

    if start > end {
        return Err(ValidationError::InvertedRange { start, end });
    }

    Ok((start, end))
}

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// `None` covers every device the caller owns.
    pub device_id: Option<DeviceId>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub granularity: Granularity,
    /// Caps the emitted rows; the summary only sees emitted rows.
    pub limit: usize,
}

impl HistoryQuery {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start > self.end {
            return Err(ValidationError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }

        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(ValidationError::Limit {
                got: self.limit,
                max: MAX_LIMIT,
            });
        }

        Ok(())
    }
}

/// A raw reading labelled with its device.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedReading {
    pub reading: Reading,
    pub device_name: Box<str>,
    pub device_serial: Box<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryRows {
    Raw(Vec<AnnotatedReading>),
    Buckets(Vec<AggregatedBucket>),
}

impl HistoryRows {
    pub fn len(&self) -> usize {
        match self {
            HistoryRows::Raw(rows) => rows.len(),
            HistoryRows::Buckets(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub rows: HistoryRows,
    /// `None` exactly when `rows` is empty.
    pub summary: Option<ReadingSummary>,
}

#[derive(Clone)]
pub struct AggregationEngine<D, R> {
    devices: D,
    readings: R,
}

impl<D, R> AggregationEngine<D, R>
where
    D: DeviceRegistry,
    R: ReadingRegistry,
{
    pub fn new(devices: D, readings: R) -> Self {
        Self { devices, readings }
    }

    pub async fn query(&self, caller: UserId, query: &HistoryQuery) -> Result<History, QueryError> {
        query.validate()?;

        let scope = self.scope(caller, query.device_id).await?;
        let labels: HashMap<DeviceId, &Device> = scope.iter().map(|d| (d.id, d)).collect();

        // The limit keeps the newest rows. Raw rows are limited in storage
        // newest first; buckets need every sample first.
        let newest_first = query.granularity == Granularity::Raw;
        let (limit, sort_order) = if newest_first {
            (query.limit, SortOrder::Desc)
        } else {
            (usize::MAX, SortOrder::Asc)
        };

        let mut readings = self
            .readings
            .list(QueryOptions {
                filter: ReadingFilter::for_devices(labels.keys().copied())
                    .between(query.start, query.end),
                sort_by: ReadingSortBy::Timestamp,
                sort_order,
                pagination: Pagination::Offset { offset: 0, limit },
            })
            .await
            .map_err(QueryError::storage)?;
        if newest_first {
            readings.reverse();
        }

        let rows = match query.granularity.bucket_size_ms() {
            None => HistoryRows::Raw(
                readings
                    .into_iter()
                    .filter_map(|reading| {
                        let device = labels.get(&reading.device_id)?;
                        Some(AnnotatedReading {
                            device_name: device.name.clone(),
                            device_serial: device.serial.clone(),
                            reading,
                        })
                    })
                    .collect(),
            ),
            Some(size) => {
                let mut buckets = bucket_readings(&readings, size);
                let excess = buckets.len().saturating_sub(query.limit);
                buckets.drain(..excess);
                HistoryRows::Buckets(buckets)
            }
        };

        let summary = match &rows {
            HistoryRows::Raw(rows) => summarize(
                rows.iter().map(|r| SummaryPoint::from(&r.reading)),
                query.start,
                query.end,
            ),
            HistoryRows::Buckets(rows) => {
                summarize(rows.iter().map(SummaryPoint::from), query.start, query.end)
            }
        };

        Ok(History { rows, summary })
    }

    async fn scope(
        &self,
        caller: UserId,
        device_id: Option<DeviceId>,
    ) -> Result<Vec<Device>, QueryError> {
        if let Some(device_id) = device_id {
            let device = self
                .devices
                .get(device_id)
                .await
                .map_err(QueryError::storage)?
                .filter(|d| d.owner == caller)
                .ok_or(QueryError::Authorization { caller, device_id })?;
            return Ok(vec![device]);
        }

        self.devices
            .list(QueryOptions {
                filter: DeviceFilter::builder().owner(caller).build(),
                sort_by: DeviceSortBy::CreatedAt,
                sort_order: SortOrder::Asc,
                pagination: Pagination::all(),
            })
            .await
            .map_err(QueryError::storage)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn value(self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

struct BucketAccumulator {
    samples: usize,
    battery_level: Mean,
    input_watts: Mean,
    ac_input_watts: Mean,
    dc_input_watts: Mean,
    output_watts: Mean,
    ac_output_watts: Mean,
    dc_output_watts: Mean,
    usb_output_watts: Mean,
    remaining_time: Mean,
    temperature: Mean,
    last: (Timestamp, StationStatus),
}

impl BucketAccumulator {
    fn new(first: &Reading) -> Self {
        Self {
            samples: 0,
            battery_level: Mean::default(),
            input_watts: Mean::default(),
            ac_input_watts: Mean::default(),
            dc_input_watts: Mean::default(),
            output_watts: Mean::default(),
            ac_output_watts: Mean::default(),
            dc_output_watts: Mean::default(),
            usb_output_watts: Mean::default(),
            remaining_time: Mean::default(),
            temperature: Mean::default(),
            last: (first.timestamp, first.status),
        }
    }

    fn push(&mut self, r: &Reading) {
        self.samples += 1;
        self.battery_level.push(r.battery_level);
        self.input_watts.push(r.input_watts);
        self.ac_input_watts.push(r.ac_input_watts);
        self.dc_input_watts.push(r.dc_input_watts);
        self.output_watts.push(r.output_watts);
        self.ac_output_watts.push(r.ac_output_watts);
        self.dc_output_watts.push(r.dc_output_watts);
        self.usb_output_watts.push(r.usb_output_watts);
        self.remaining_time.push(r.remaining_time);
        self.temperature.push(r.temperature);

        // Ties go to the later arrival.
        if r.timestamp >= self.last.0 {
            self.last = (r.timestamp, r.status);
        }
    }

    fn finish(self, bucket_start: i64, device_id: DeviceId) -> AggregatedBucket {
        AggregatedBucket {
            bucket_start,
            device_id,
            samples: self.samples,
            battery_level: self.battery_level.value(),
            input_watts: self.input_watts.value(),
            ac_input_watts: self.ac_input_watts.value(),
            dc_input_watts: self.dc_input_watts.value(),
            output_watts: self.output_watts.value(),
            ac_output_watts: self.ac_output_watts.value(),
            dc_output_watts: self.dc_output_watts.value(),
            usb_output_watts: self.usb_output_watts.value(),
            remaining_time: self.remaining_time.value(),
            temperature: self.temperature.value(),
            status: self.last.1,
        }
    }
}

/// Groups readings into `(bucket start, device)` windows, sorted by start.
///
/// Numeric fields average the non-null contributors and stay null when
/// every contributor is null. Status comes from the latest reading.
pub fn bucket_readings(readings: &[Reading], bucket_size_ms: i64) -> Vec<AggregatedBucket> {
    let mut buckets: BTreeMap<(i64, DeviceId), BucketAccumulator> = BTreeMap::new();

    for reading in readings {
        let start = bucket_start(reading.timestamp.as_millisecond(), bucket_size_ms);
        buckets
            .entry((start, reading.device_id))
            .or_insert_with(|| BucketAccumulator::new(reading))
            .push(reading);
    }

    buckets
        .into_iter()
        .map(|((start, device_id), acc)| acc.finish(start, device_id))
        .collect()
}

/// The fields a summary looks at, taken from a raw row or a bucket.
#[derive(Debug, Clone, Copy)]
pub struct SummaryPoint {
    pub battery_level: Option<f64>,
    pub output_watts: Option<f64>,
    pub temperature: Option<f64>,
}

impl From<&Reading> for SummaryPoint {
    fn from(r: &Reading) -> Self {
        Self {
            battery_level: r.battery_level,
            output_watts: r.output_watts,
            temperature: r.temperature,
        }
    }
}

impl From<&AggregatedBucket> for SummaryPoint {
    fn from(b: &AggregatedBucket) -> Self {
        Self {
            battery_level: b.battery_level,
            output_watts: b.output_watts,
            temperature: b.temperature,
        }
    }
}

fn fold_extreme(acc: Option<f64>, value: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(pick(a, v)),
        (None, v) => v,
        (a, None) => a,
    }
}

/// Summary statistics; `None` when there are no points.
pub fn summarize(
    points: impl IntoIterator<Item = SummaryPoint>,
    start: Timestamp,
    end: Timestamp,
) -> Option<ReadingSummary> {
    let mut total = 0usize;
    let mut battery = Mean::default();
    let mut output = Mean::default();
    let mut temperature = Mean::default();
    let mut peak_output = None;
    let mut min_battery = None;
    let mut max_temperature = None;

    for p in points {
        total += 1;
        battery.push(p.battery_level);
        output.push(p.output_watts);
        temperature.push(p.temperature);
        peak_output = fold_extreme(peak_output, p.output_watts, f64::max);
        min_battery = fold_extreme(min_battery, p.battery_level, f64::min);
        max_temperature = fold_extreme(max_temperature, p.temperature, f64::max);
    }

    if total == 0 {
        return None;
    }

    Some(ReadingSummary {
        total_readings: total,
        avg_battery: battery.value(),
        avg_output: output.value(),
        avg_temperature: temperature.value(),
        peak_output,
        min_battery,
        max_temperature,
        start,
        end,
    })
}
