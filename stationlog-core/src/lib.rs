use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

mod collection;

pub use collection::{CollectionStatus, CollectionStatusView};

// Names and serials never grow after a device is registered, so they are
// kept as `Box<str>` rather than `String`.
type BoxStr = Box<str>;

/// Unique identifier for an account that owns devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Ulid);

/// Unique identifier for a registered power station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub Ulid);

/// Unique identifier for a persisted reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadingId(pub Ulid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A portable power station registered to an owner.
///
/// Online status is not stored here. It is derived from the most recent
/// reading for the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identity of this device.
    pub id: DeviceId,
    /// Vendor serial number, unique across all devices.
    pub serial: BoxStr,
    /// Display name chosen by the owner or reported by the vendor.
    pub name: BoxStr,
    /// Product line reported by the vendor (e.g. "DELTA 2").
    pub kind: BoxStr,
    /// Account that owns this device.
    pub owner: UserId,
    /// Inactive devices are skipped by bulk collection.
    pub active: bool,
    /// Included in the daily server-side backup collection.
    pub backup_enabled: bool,
    /// Registration timestamp.
    pub created_at: jiff::Timestamp,
}

/// How the station is currently being charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargingType {
    None,
    Adapter,
    Solar,
    Ac,
    Gas,
    Wind,
}

impl ChargingType {
    /// Maps the vendor's numeric charge-type code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Adapter),
            2 => Some(Self::Solar),
            3 => Some(Self::Ac),
            4 => Some(Self::Gas),
            5 => Some(Self::Wind),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Adapter => 1,
            Self::Solar => 2,
            Self::Ac => 3,
            Self::Gas => 4,
            Self::Wind => 5,
        }
    }
}

/// Operating state derived from power flow and charge level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Charging,
    Discharging,
    Full,
    Low,
    Standby,
}

impl StationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::Discharging => "discharging",
            Self::Full => "full",
            Self::Low => "low",
            Self::Standby => "standby",
        }
    }
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charging" => Ok(Self::Charging),
            "discharging" => Ok(Self::Discharging),
            "full" => Ok(Self::Full),
            "low" => Ok(Self::Low),
            "standby" => Ok(Self::Standby),
            other => Err(ValidationError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One immutable telemetry sample for a device.
///
/// Numeric fields are optional because a stored sample may predate a
/// channel, and aggregation must tell "absent" apart from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unique id for this reading.
    pub id: ReadingId,
    /// Device the sample belongs to.
    pub device_id: DeviceId,
    /// When the sample was taken.
    pub timestamp: jiff::Timestamp,
    /// State of charge, 0–100.
    pub battery_level: Option<f64>,
    /// Total input power in watts.
    pub input_watts: Option<f64>,
    pub ac_input_watts: Option<f64>,
    pub dc_input_watts: Option<f64>,
    pub charging_type: ChargingType,
    /// Total output power in watts.
    pub output_watts: Option<f64>,
    pub ac_output_watts: Option<f64>,
    pub dc_output_watts: Option<f64>,
    pub usb_output_watts: Option<f64>,
    /// Signed minutes: positive is time to full, negative is time to empty.
    pub remaining_time: Option<f64>,
    /// Battery temperature in degrees Celsius.
    pub temperature: Option<f64>,
    pub status: StationStatus,
    /// Untouched vendor payload, kept for reprocessing.
    pub raw: serde_json::Value,
}

/// Time resolution of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Granularity {
    #[default]
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
}

impl Granularity {
    /// Bucket width in milliseconds, `None` for raw rows.
    pub fn bucket_size_ms(self) -> Option<i64> {
        match self {
            Self::Raw => None,
            Self::FiveMinutes => Some(5 * 60 * 1000),
            Self::Hour => Some(60 * 60 * 1000),
            Self::Day => Some(24 * 60 * 60 * 1000),
        }
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "5m" => Ok(Self::FiveMinutes),
            "1h" => Ok(Self::Hour),
            "1d" => Ok(Self::Day),
            other => Err(ValidationError::UnknownGranularity(other.to_owned())),
        }
    }
}

/// Start of the bucket containing `timestamp_ms`.
///
/// Floors towards negative infinity so pre-epoch samples still land in the
/// bucket that contains them.
pub fn bucket_start(timestamp_ms: i64, bucket_size_ms: i64) -> i64 {
    timestamp_ms.div_euclid(bucket_size_ms) * bucket_size_ms
}

/// A fixed-width window of readings for a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBucket {
    /// Bucket start in epoch milliseconds.
    pub bucket_start: i64,
    pub device_id: DeviceId,
    /// Number of raw readings that fell into this bucket.
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
    /// Status of the chronologically last reading in the bucket.
    pub status: StationStatus,
}

/// Summary statistics over a history result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSummary {
    pub total_readings: usize,
    pub avg_battery: Option<f64>,
    pub avg_output: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub peak_output: Option<f64>,
    pub min_battery: Option<f64>,
    pub max_temperature: Option<f64>,
    pub start: jiff::Timestamp,
    pub end: jiff::Timestamp,
}

/// Outcome of a collection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub imported: u32,
    pub skipped: u32,
}

/// Malformed range, interval or enum parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("start {start} is after end {end}")]
    InvertedRange {
        start: jiff::Timestamp,
        end: jiff::Timestamp,
    },
    #[error("unknown time range: {0}")]
    UnknownTimeRange(String),
    #[error("unknown aggregation: {0}")]
    UnknownGranularity(String),
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("missing parameter: {0}")]
    Missing(&'static str),
    #[error("limit must be between 1 and {max}, got {got}")]
    Limit { got: usize, max: usize },
    #[error("interval of {got_ms} ms is below the minimum of {min_ms} ms")]
    IntervalTooShort { got_ms: u64, min_ms: u64 },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid id: {0}")]
    InvalidId(String),
}

/// Rejects a zero period before it reaches a timer.
pub fn nonzero_interval(
    name: &'static str,
    interval: std::time::Duration,
) -> Result<std::time::Duration, ValidationError> {
    if interval.is_zero() {
        return Err(ValidationError::ZeroInterval(name));
    }
    Ok(interval)
}
