//! Decoding of vendor quota snapshots into canonical readings.
//!
//! Each canonical field is resolved through an ordered chain of accessors.
//! The chains live in [`FIELD_CHAINS`] as plain data so their priority
//! order can be inspected and tested on its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stationlog_core::{ChargingType, DeviceId, Reading, ReadingId, StationStatus};
use ulid::Ulid;

/// Flat key → value telemetry snapshot returned by the quota endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaMap(pub BTreeMap<String, Value>);

impl QuotaMap {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric value of `key`, with any carried scale divisor applied.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(decode_number)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for QuotaMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Accepts bare numbers, numeric strings and `{ "val": n, "scale": d }`.
fn decode_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(obj) => {
            let raw = obj
                .get("val")
                .or_else(|| obj.get("value"))
                .and_then(decode_number)?;
            match obj.get("scale").or_else(|| obj.get("divisor")).and_then(decode_number) {
                Some(scale) if scale != 0.0 => Some(raw / scale),
                _ => Some(raw),
            }
        }
        _ => None,
    }?;

    n.is_finite().then_some(n)
}

/// Canonical numeric fields of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BatteryLevel,
    InputWatts,
    AcInputWatts,
    DcInputWatts,
    OutputWatts,
    AcOutputWatts,
    DcOutputWatts,
    UsbOutputWatts,
    RemainingTime,
    Temperature,
}

/// One candidate source for a field.
#[derive(Debug, Clone, Copy)]
pub enum Accessor {
    /// A single vendor key.
    Key(&'static str),
    /// Sum of every listed key that is present; absent if none are.
    SumOf(&'static [&'static str]),
    /// Computed from other fields or keys.
    Derived(fn(&QuotaMap) -> Option<f64>),
}

impl Accessor {
    fn resolve(&self, quota: &QuotaMap) -> Option<f64> {
        match self {
            Accessor::Key(key) => quota.number(key),
            Accessor::SumOf(keys) => sum_present(keys.iter().map(|k| quota.number(k))),
            Accessor::Derived(f) => f(quota),
        }
    }
}

/// Priority-ordered accessors for one field, plus the value used when
/// none of them match.
#[derive(Debug, Clone, Copy)]
pub struct FieldChain {
    pub field: Field,
    pub accessors: &'static [Accessor],
    pub default: Option<f64>,
}

const USB_PORT_KEYS: &[&str] = &[
    "pd.usb1Watts",
    "pd.usb2Watts",
    "pd.qcUsb1Watts",
    "pd.qcUsb2Watts",
    "pd.typec1Watts",
    "pd.typec2Watts",
];

pub const FIELD_CHAINS: &[FieldChain] = &[
    FieldChain {
        field: Field::BatteryLevel,
        accessors: &[
            Accessor::Key("pd.soc"),
            Accessor::Key("bms_bmsStatus.soc"),
            Accessor::Key("bms_emsStatus.lcdShowSoc"),
            Accessor::Key("soc"),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::InputWatts,
        accessors: &[
            Accessor::Key("pd.wattsInSum"),
            Accessor::Key("inputWatts"),
            Accessor::Key("totalInputWatts"),
            Accessor::Derived(input_breakdown_sum),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::AcInputWatts,
        accessors: &[Accessor::Key("inv.inputWatts"), Accessor::Key("acInputWatts")],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::DcInputWatts,
        accessors: &[
            Accessor::Key("mppt.inWatts"),
            Accessor::Key("pd.dcInWatts"),
            Accessor::Key("dcInputWatts"),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::OutputWatts,
        accessors: &[
            Accessor::Key("pd.wattsOutSum"),
            Accessor::Key("outputWatts"),
            Accessor::Key("totalOutputWatts"),
            Accessor::Derived(output_breakdown_sum),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::AcOutputWatts,
        accessors: &[Accessor::Key("inv.outputWatts"), Accessor::Key("acOutputWatts")],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::DcOutputWatts,
        accessors: &[
            Accessor::Key("pd.carWatts"),
            Accessor::Key("mppt.carOutWatts"),
            Accessor::Key("dcOutputWatts"),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::UsbOutputWatts,
        accessors: &[
            Accessor::SumOf(USB_PORT_KEYS),
            Accessor::Key("usbOutputWatts"),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::RemainingTime,
        accessors: &[
            Accessor::Key("pd.remainTime"),
            Accessor::Key("remainingTime"),
            Accessor::Derived(ems_remaining_time),
        ],
        default: Some(0.0),
    },
    FieldChain {
        field: Field::Temperature,
        accessors: &[
            Accessor::Key("bms_bmsStatus.temp"),
            Accessor::Key("pd.batTemp"),
            Accessor::Key("temperature"),
        ],
        // Absent, not 0 °C, so history averages are not skewed.
        default: None,
    },
];

const CHARGING_TYPE_KEYS: &[&str] = &["mppt.chgType", "pd.chgType", "chargingType"];

/// Readings above this many watts count as real power flow.
const FLOW_THRESHOLD_WATTS: f64 = 10.0;

fn chain(field: Field) -> Option<&'static FieldChain> {
    FIELD_CHAINS.iter().find(|c| c.field == field)
}

/// First accessor match for `field`, ignoring the default.
pub fn lookup(quota: &QuotaMap, field: Field) -> Option<f64> {
    chain(field)?.accessors.iter().find_map(|a| a.resolve(quota))
}

/// First accessor match for `field`, falling back to the chain default.
pub fn resolve(quota: &QuotaMap, field: Field) -> Option<f64> {
    lookup(quota, field).or_else(|| chain(field).and_then(|c| c.default))
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

fn input_breakdown_sum(quota: &QuotaMap) -> Option<f64> {
    sum_present(
        [Field::AcInputWatts, Field::DcInputWatts]
            .into_iter()
            .map(|f| lookup(quota, f)),
    )
}

fn output_breakdown_sum(quota: &QuotaMap) -> Option<f64> {
    sum_present(
        [Field::AcOutputWatts, Field::DcOutputWatts, Field::UsbOutputWatts]
            .into_iter()
            .map(|f| lookup(quota, f)),
    )
}

// The battery management system reports both directions as positive
// minutes; the sign encodes which one applies.
fn ems_remaining_time(quota: &QuotaMap) -> Option<f64> {
    let charge = quota.number("bms_emsStatus.chgRemainTime");
    let discharge = quota.number("bms_emsStatus.dsgRemainTime");
    match (charge, discharge) {
        (Some(c), _) if c > 0.0 => Some(c),
        (_, Some(d)) => Some(-d),
        (Some(c), None) => Some(c),
        (None, None) => None,
    }
}

fn charging_type(quota: &QuotaMap, ac_in: f64, dc_in: f64) -> ChargingType {
    let coded = CHARGING_TYPE_KEYS
        .iter()
        .find_map(|k| quota.number(k))
        .and_then(|code| ChargingType::from_code(code as i64));

    match coded {
        Some(kind) => kind,
        None if ac_in > 0.0 => ChargingType::Ac,
        None if dc_in > 0.0 => ChargingType::Solar,
        None => ChargingType::None,
    }
}

/// Derives the operating state from power flow and charge level.
pub fn derive_status(input_watts: f64, output_watts: f64, battery_level: f64) -> StationStatus {
    if input_watts > FLOW_THRESHOLD_WATTS {
        StationStatus::Charging
    } else if output_watts > FLOW_THRESHOLD_WATTS {
        StationStatus::Discharging
    } else if battery_level > 95.0 {
        StationStatus::Full
    } else if battery_level < 10.0 {
        StationStatus::Low
    } else {
        StationStatus::Standby
    }
}

pub fn transform_quota_to_reading(quota: &QuotaMap, device_id: DeviceId) -> Reading {
    transform_quota_to_reading_at(quota, device_id, jiff::Timestamp::now())
}

/// Builds a reading from a quota snapshot taken at `timestamp`.
pub fn transform_quota_to_reading_at(
    quota: &QuotaMap,
    device_id: DeviceId,
    timestamp: jiff::Timestamp,
) -> Reading {
    let battery_level = resolve(quota, Field::BatteryLevel);
    let input_watts = resolve(quota, Field::InputWatts);
    let ac_input_watts = resolve(quota, Field::AcInputWatts);
    let dc_input_watts = resolve(quota, Field::DcInputWatts);
    let output_watts = resolve(quota, Field::OutputWatts);

    let status = derive_status(
        input_watts.unwrap_or(0.0),
        output_watts.unwrap_or(0.0),
        battery_level.unwrap_or(0.0),
    );

    Reading {
        id: ReadingId(Ulid::new()),
        device_id,
        timestamp,
        battery_level,
        input_watts,
        ac_input_watts,
        dc_input_watts,
        charging_type: charging_type(
            quota,
            ac_input_watts.unwrap_or(0.0),
            dc_input_watts.unwrap_or(0.0),
        ),
        output_watts,
        ac_output_watts: resolve(quota, Field::AcOutputWatts),
        dc_output_watts: resolve(quota, Field::DcOutputWatts),
        usb_output_watts: resolve(quota, Field::UsbOutputWatts),
        remaining_time: resolve(quota, Field::RemainingTime),
        temperature: resolve(quota, Field::Temperature),
        status,
        raw: serde_json::to_value(quota).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quota(value: Value) -> QuotaMap {
        serde_json::from_value(value).unwrap()
    }

    fn device() -> DeviceId {
        DeviceId(Ulid::new())
    }

    #[test]
    fn total_output_alone_leaves_breakdown_at_zero() {
        let q = quota(json!({ "pd.wattsOutSum": { "val": 450 } }));
        let reading = transform_quota_to_reading(&q, device());

        assert_eq!(reading.output_watts, Some(450.0));
        assert_eq!(reading.ac_output_watts, Some(0.0));
        assert_eq!(reading.dc_output_watts, Some(0.0));
        assert_eq!(reading.usb_output_watts, Some(0.0));
        assert_eq!(reading.status, StationStatus::Discharging);
    }

    #[test]
    fn fallback_key_is_used_when_primary_missing() {
        let q = quota(json!({ "bms_bmsStatus.soc": 64 }));
        assert_eq!(resolve(&q, Field::BatteryLevel), Some(64.0));

        let q = quota(json!({ "totalOutputWatts": { "val": 1234, "scale": 10 } }));
        assert_eq!(resolve(&q, Field::OutputWatts), Some(123.4));
    }

    #[test]
    fn primary_key_wins_over_fallbacks() {
        let q = quota(json!({ "pd.soc": 90, "soc": 10 }));
        assert_eq!(resolve(&q, Field::BatteryLevel), Some(90.0));
    }

    #[test]
    fn output_falls_back_to_breakdown_sum() {
        let q = quota(json!({
            "inv.outputWatts": 200,
            "pd.carWatts": 30,
            "pd.usb1Watts": 5,
            "pd.typec1Watts": { "val": 150, "scale": 10 }
        }));

        assert_eq!(resolve(&q, Field::UsbOutputWatts), Some(20.0));
        assert_eq!(resolve(&q, Field::OutputWatts), Some(250.0));
    }

    #[test]
    fn no_matching_keys_resolves_to_zero() {
        let q = quota(json!({ "unrelated": "x" }));
        let reading = transform_quota_to_reading(&q, device());

        assert_eq!(reading.battery_level, Some(0.0));
        assert_eq!(reading.input_watts, Some(0.0));
        assert_eq!(reading.output_watts, Some(0.0));
        assert_eq!(reading.remaining_time, Some(0.0));
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.charging_type, ChargingType::None);
        assert_eq!(reading.status, StationStatus::Low);
    }

    #[test]
    fn every_field_has_exactly_one_chain() {
        let fields = [
            Field::BatteryLevel,
            Field::InputWatts,
            Field::AcInputWatts,
            Field::DcInputWatts,
            Field::OutputWatts,
            Field::AcOutputWatts,
            Field::DcOutputWatts,
            Field::UsbOutputWatts,
            Field::RemainingTime,
            Field::Temperature,
        ];
        for field in fields {
            assert_eq!(FIELD_CHAINS.iter().filter(|c| c.field == field).count(), 1);
        }
    }

    #[test]
    fn decodes_strings_and_rejects_garbage() {
        let q = quota(json!({
            "a": "12.5",
            "b": true,
            "c": { "val": "n/a" },
            "d": { "value": 7, "scale": 0 }
        }));

        assert_eq!(q.number("a"), Some(12.5));
        assert_eq!(q.number("b"), None);
        assert_eq!(q.number("c"), None);
        assert_eq!(q.number("d"), Some(7.0));
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(derive_status(11.0, 500.0, 50.0), StationStatus::Charging);
        assert_eq!(derive_status(10.0, 11.0, 50.0), StationStatus::Discharging);
        assert_eq!(derive_status(0.0, 10.0, 96.0), StationStatus::Full);
        assert_eq!(derive_status(0.0, 0.0, 9.0), StationStatus::Low);
        assert_eq!(derive_status(0.0, 0.0, 95.0), StationStatus::Standby);
        assert_eq!(derive_status(0.0, 0.0, 10.0), StationStatus::Standby);
    }

    #[test]
    fn remaining_time_sign_follows_direction() {
        let charging = quota(json!({ "bms_emsStatus.chgRemainTime": 45, "bms_emsStatus.dsgRemainTime": 300 }));
        assert_eq!(resolve(&charging, Field::RemainingTime), Some(45.0));

        let draining = quota(json!({ "bms_emsStatus.chgRemainTime": 0, "bms_emsStatus.dsgRemainTime": 300 }));
        assert_eq!(resolve(&draining, Field::RemainingTime), Some(-300.0));

        let signed = quota(json!({ "pd.remainTime": -120 }));
        assert_eq!(resolve(&signed, Field::RemainingTime), Some(-120.0));
    }

    #[test]
    fn charging_type_from_code_or_inputs() {
        let coded = quota(json!({ "mppt.chgType": 2, "pd.wattsInSum": 180 }));
        let reading = transform_quota_to_reading(&coded, device());
        assert_eq!(reading.charging_type, ChargingType::Solar);
        assert_eq!(reading.status, StationStatus::Charging);

        let inferred = quota(json!({ "inv.inputWatts": 300 }));
        let reading = transform_quota_to_reading(&inferred, device());
        assert_eq!(reading.charging_type, ChargingType::Ac);
        assert_eq!(reading.input_watts, Some(300.0));
    }

    #[test]
    fn raw_payload_is_retained() {
        let q = quota(json!({ "pd.soc": 50, "vendor.extra": [1, 2] }));
        let reading = transform_quota_to_reading(&q, device());

        assert_eq!(reading.raw["vendor.extra"], json!([1, 2]));
    }
}
