use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use stationlog_core::{
    AggregatedBucket, ChargingType, Device, DeviceId, IngestSummary, Reading, ReadingSummary,
    StationStatus, ValidationError,
};
use stationlog_vendor::QuotaMap;
use ulid::Ulid;

use crate::aggregate::{AnnotatedReading, History, HistoryRows};

pub fn parse_device_id(id: &str) -> Result<DeviceId, ValidationError> {
    Ulid::from_str(id)
        .map(DeviceId)
        .map_err(|_| ValidationError::InvalidId(id.to_owned()))
}

// Collection

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub device_id: String,
    #[serde(default)]
    pub quota: Option<QuotaMap>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: IngestSummary,
}

// Devices

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub id: String,
    pub serial: String,
    pub name: String,
    pub kind: String,
    pub active: bool,
    pub backup_enabled: bool,
    pub created_at: Timestamp,
    /// Latest reading is within the online window.
    pub online: bool,
    /// Status of that same latest reading.
    pub last_status: Option<StationStatus>,
    pub last_reading_at: Option<Timestamp>,
}

impl DeviceResponse {
    pub fn new(device: Device, latest: Option<&Reading>, online: bool) -> Self {
        Self {
            id: device.id.to_string(),
            serial: device.serial.into(),
            name: device.name.into(),
            kind: device.kind.into(),
            active: device.active,
            backup_enabled: device.backup_enabled,
            created_at: device.created_at,
            online,
            last_status: latest.map(|r| r.status),
            last_reading_at: latest.map(|r| r.timestamp),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceResponse>,
}

// History

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub device_id: Option<String>,
    pub time_range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub aggregation: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    pub device_serial: String,
    pub timestamp: Timestamp,
    pub battery_level: Option<f64>,
    pub input_watts: Option<f64>,
    pub ac_input_watts: Option<f64>,
    pub dc_input_watts: Option<f64>,
    pub charging_type: ChargingType,
    pub output_watts: Option<f64>,
    pub ac_output_watts: Option<f64>,
    pub dc_output_watts: Option<f64>,
    pub usb_output_watts: Option<f64>,
    pub remaining_time: Option<f64>,
    pub temperature: Option<f64>,
    pub status: StationStatus,
}

impl From<AnnotatedReading> for RawRow {
    fn from(row: AnnotatedReading) -> Self {
        let r = row.reading;
        Self {
            id: r.id.to_string(),
            device_id: r.device_id.to_string(),
            device_name: row.device_name.into(),
            device_serial: row.device_serial.into(),
            timestamp: r.timestamp,
            battery_level: r.battery_level,
            input_watts: r.input_watts,
            ac_input_watts: r.ac_input_watts,
            dc_input_watts: r.dc_input_watts,
            charging_type: r.charging_type,
            output_watts: r.output_watts,
            ac_output_watts: r.ac_output_watts,
            dc_output_watts: r.dc_output_watts,
            usb_output_watts: r.usb_output_watts,
            remaining_time: r.remaining_time,
            temperature: r.temperature,
            status: r.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRow {
    pub device_id: String,
    pub timestamp: i64,
    pub samples: usize,
    pub battery_level: Option<f64>,
    pub input_watts: Option<f64>,
    pub ac_input_watts: Option<f64>,
    pub dc_input_watts: Option<f64>,
    pub output_watts: Option<f64>,
    pub ac_output_watts: Option<f64>,
    pub dc_output_watts: Option<f64>,
    pub usb_output_watts: Option<f64>,
    pub remaining_time: Option<f64>,
    pub temperature: Option<f64>,
    pub status: StationStatus,
}

impl From<AggregatedBucket> for BucketRow {
    fn from(b: AggregatedBucket) -> Self {
        Self {
            device_id: b.device_id.to_string(),
            timestamp: b.bucket_start,
            samples: b.samples,
            battery_level: b.battery_level,
            input_watts: b.input_watts,
            ac_input_watts: b.ac_input_watts,
            dc_input_watts: b.dc_input_watts,
            output_watts: b.output_watts,
            ac_output_watts: b.ac_output_watts,
            dc_output_watts: b.dc_output_watts,
            usb_output_watts: b.usb_output_watts,
            remaining_time: b.remaining_time,
            temperature: b.temperature,
            status: b.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HistoryRow {
    Raw(RawRow),
    Bucket(BucketRow),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryBody {
    pub total_readings: usize,
    pub avg_battery: Option<f64>,
    pub avg_output: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub peak_output: Option<f64>,
    pub min_battery: Option<f64>,
    pub max_temperature: Option<f64>,
    pub time_range: TimeRangeBody,
}

#[derive(Debug, Serialize)]
pub struct TimeRangeBody {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl From<ReadingSummary> for SummaryBody {
    fn from(s: ReadingSummary) -> Self {
        Self {
            total_readings: s.total_readings,
            avg_battery: s.avg_battery,
            avg_output: s.avg_output,
            avg_temperature: s.avg_temperature,
            peak_output: s.peak_output,
            min_battery: s.min_battery,
            max_temperature: s.max_temperature,
            time_range: TimeRangeBody {
                start: s.start,
                end: s.end,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub readings: Vec<HistoryRow>,
    pub summary: Option<SummaryBody>,
}

impl From<History> for HistoryResponse {
    fn from(history: History) -> Self {
        let readings = match history.rows {
            HistoryRows::Raw(rows) => rows.into_iter().map(|r| HistoryRow::Raw(r.into())).collect(),
            HistoryRows::Buckets(rows) => rows
                .into_iter()
                .map(|b| HistoryRow::Bucket(b.into()))
                .collect(),
        };

        Self {
            readings,
            summary: history.summary.map(Into::into),
        }
    }
}
