//! Readings returned by the Powerwall gateway's local API.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// Energy-flow category reported by `/api/meters/aggregates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The grid connection. The gateway calls it "site".
    Site,
    Battery,
    Load,
    Solar,
}

impl Source {
    /// Every source, in the order they are exported.
    pub const ALL: [Source; 4] = [Source::Site, Source::Battery, Source::Load, Source::Solar];

    /// Label value used for the `source` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Site => "site",
            Source::Battery => "battery",
            Source::Load => "load",
            Source::Solar => "solar",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode `null` as the type's default value.
///
/// Combined with `#[serde(default)]` on the container, absent and `null`
/// fields both read as zero while wrong types still fail to decode.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One meter reading for a single source.
///
/// Fields the gateway omits or sends as `null` are zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyRecord {
    /// When the gateway last heard from this meter.
    #[serde(deserialize_with = "null_as_default")]
    pub last_communication_time: DateTime<FixedOffset>,
    /// Real power in W.
    #[serde(deserialize_with = "null_as_default")]
    pub instant_power: f64,
    /// Reactive power in VAR.
    #[serde(deserialize_with = "null_as_default")]
    pub instant_reactive_power: f64,
    /// Apparent power in VA.
    #[serde(deserialize_with = "null_as_default")]
    pub instant_apparent_power: f64,
    /// Line frequency in Hz.
    #[serde(deserialize_with = "null_as_default")]
    pub frequency: f64,
    /// Cumulative energy exported in Wh.
    #[serde(deserialize_with = "null_as_default")]
    pub energy_exported: f64,
    /// Cumulative energy imported in Wh.
    #[serde(deserialize_with = "null_as_default")]
    pub energy_imported: f64,
    /// Average voltage in V.
    #[serde(deserialize_with = "null_as_default")]
    pub instant_average_voltage: f64,
    /// Total current in A.
    #[serde(deserialize_with = "null_as_default")]
    pub instant_total_current: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub timeout: i64,
}

/// Response of `/api/meters/aggregates`.
///
/// A source missing from the payload reads as an all-zero record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    #[serde(deserialize_with = "null_as_default")]
    pub site: EnergyRecord,
    #[serde(deserialize_with = "null_as_default")]
    pub battery: EnergyRecord,
    #[serde(deserialize_with = "null_as_default")]
    pub load: EnergyRecord,
    #[serde(deserialize_with = "null_as_default")]
    pub solar: EnergyRecord,
}

impl StatusSnapshot {
    /// Reading for a given source.
    pub fn record(&self, source: Source) -> &EnergyRecord {
        match source {
            Source::Site => &self.site,
            Source::Battery => &self.battery,
            Source::Load => &self.load,
            Source::Solar => &self.solar,
        }
    }

    /// All readings paired with their source, in export order.
    pub fn records(&self) -> impl Iterator<Item = (Source, &EnergyRecord)> {
        Source::ALL.into_iter().map(|s| (s, self.record(s)))
    }
}

/// Response of `/api/system_status/soe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateOfEnergyReading {
    /// Stored energy as a percentage of capacity, nominally 0 to 100.
    #[serde(deserialize_with = "null_as_default")]
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "last_communication_time": "2018-09-17T20:54:38.186052271-07:00",
        "instant_power": -1.5,
        "instant_reactive_power": 21.25,
        "instant_apparent_power": 30.5,
        "frequency": 60.01,
        "energy_exported": 1056797.48,
        "energy_imported": 1081067.8,
        "instant_average_voltage": 242.4,
        "instant_total_current": 0.0,
        "i_a_current": 0,
        "timeout": 1500000000
    }"#;

    #[test]
    fn test_decode_record_ignores_unknown_fields() {
        let record: EnergyRecord = serde_json::from_str(RECORD).unwrap();

        assert_eq!(record.instant_power, -1.5);
        assert_eq!(record.instant_reactive_power, 21.25);
        assert_eq!(record.frequency, 60.01);
        assert_eq!(record.timeout, 1_500_000_000);
        assert_eq!(record.last_communication_time.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn test_decode_record_rejects_bad_timestamp() {
        let json = RECORD.replace("2018-09-17T20:54:38.186052271-07:00", "yesterday");
        assert!(serde_json::from_str::<EnergyRecord>(&json).is_err());
    }

    #[test]
    fn test_decode_record_missing_field_is_zero() {
        let json = RECORD.replace("\"frequency\": 60.01,", "");
        let record: EnergyRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(record.frequency, 0.0);
        assert_eq!(record.instant_average_voltage, 242.4);
    }

    #[test]
    fn test_decode_record_null_field_is_zero() {
        let json = RECORD
            .replace("\"frequency\": 60.01", "\"frequency\": null")
            .replace("\"2018-09-17T20:54:38.186052271-07:00\"", "null");
        let record: EnergyRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(record.frequency, 0.0);
        assert_eq!(record.last_communication_time, DateTime::<FixedOffset>::default());
        assert_eq!(record.instant_power, -1.5);
    }

    #[test]
    fn test_decode_record_rejects_wrong_type() {
        let json = RECORD.replace("\"frequency\": 60.01", "\"frequency\": \"sixty\"");
        assert!(serde_json::from_str::<EnergyRecord>(&json).is_err());
    }

    #[test]
    fn test_decode_snapshot_missing_source() {
        let json = format!(
            r#"{{"site": {0}, "battery": {0}, "load": null}}"#,
            RECORD
        );
        let snapshot: StatusSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(snapshot.site.instant_power, -1.5);
        assert_eq!(snapshot.load, EnergyRecord::default());
        assert_eq!(snapshot.solar, EnergyRecord::default());
        assert_eq!(snapshot.records().count(), 4);
    }

    #[test]
    fn test_decode_snapshot_rejects_non_object() {
        assert!(serde_json::from_str::<StatusSnapshot>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<StatusSnapshot>(r#"{"site": 12}"#).is_err());
    }

    #[test]
    fn test_snapshot_record_lookup() {
        let json = format!(
            r#"{{"site": {0}, "battery": {0}, "load": {0}, "solar": {0}}}"#,
            RECORD
        );
        let mut snapshot: StatusSnapshot = serde_json::from_str(&json).unwrap();
        snapshot.battery.instant_power = 1234.0;

        assert_eq!(snapshot.record(Source::Battery).instant_power, 1234.0);
        assert_eq!(snapshot.record(Source::Site).instant_power, -1.5);

        let sources: Vec<_> = snapshot.records().map(|(s, _)| s.as_str()).collect();
        assert_eq!(sources, vec!["site", "battery", "load", "solar"]);
    }

    #[test]
    fn test_decode_state_of_energy() {
        let soe: StateOfEnergyReading = serde_json::from_str(r#"{"percentage": 69.1675}"#).unwrap();
        assert_eq!(soe.percentage, 69.1675);
    }

    #[test]
    fn test_decode_state_of_energy_wrong_type() {
        assert!(serde_json::from_str::<StateOfEnergyReading>(r#"{"percentage": "full"}"#).is_err());
        let soe: StateOfEnergyReading = serde_json::from_str(r#"{"percentage": null}"#).unwrap();
        assert_eq!(soe.percentage, 0.0);
    }
}
