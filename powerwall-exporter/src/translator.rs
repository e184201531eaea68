//! Translation of gateway readings into Prometheus gauges.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{EnergyRecord, Source, StateOfEnergyReading, StatusSnapshot};
use crate::registry::{InstrumentKind, MetricSet};

/// Label carrying the source name on every per-source gauge.
pub const SOURCE_LABEL: &str = "source";

/// Which record field feeds each gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMapping {
    /// Every gauge reads its own field.
    #[default]
    Strict,
    /// `instant_apparent_power` reads `instant_reactive_power`. Keeps series
    /// continuity with dashboards built on that historical output.
    Compatible,
}

/// Per-source measurement exported as a labeled gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    InstantPower,
    InstantReactivePower,
    InstantApparentPower,
    Frequency,
    EnergyExported,
    EnergyImported,
    InstantAverageVoltage,
    InstantTotalCurrent,
}

impl Measurement {
    pub const ALL: [Measurement; 8] = [
        Measurement::InstantPower,
        Measurement::InstantReactivePower,
        Measurement::InstantApparentPower,
        Measurement::Frequency,
        Measurement::EnergyExported,
        Measurement::EnergyImported,
        Measurement::InstantAverageVoltage,
        Measurement::InstantTotalCurrent,
    ];

    /// Metric name without the namespace.
    pub fn suffix(&self) -> &'static str {
        match self {
            Measurement::InstantPower => "instant_power",
            Measurement::InstantReactivePower => "instant_reactive_power",
            Measurement::InstantApparentPower => "instant_apparent_power",
            Measurement::Frequency => "frequency",
            Measurement::EnergyExported => "energy_exported",
            Measurement::EnergyImported => "energy_imported",
            Measurement::InstantAverageVoltage => "instant_average_voltage",
            Measurement::InstantTotalCurrent => "instant_total_current",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Measurement::InstantPower => "Instant real power for source in watts",
            Measurement::InstantReactivePower => "Instant reactive power for source in VAR",
            Measurement::InstantApparentPower => "Instant apparent power for source in VA",
            Measurement::Frequency => "Line frequency for source in hertz",
            Measurement::EnergyExported => "Cumulative energy exported by source in watt-hours",
            Measurement::EnergyImported => "Cumulative energy imported by source in watt-hours",
            Measurement::InstantAverageVoltage => "Instant average voltage for source in volts",
            Measurement::InstantTotalCurrent => "Instant total current for source in amperes",
        }
    }

    /// Read this measurement from a record.
    pub fn read(&self, record: &EnergyRecord, mapping: FieldMapping) -> f64 {
        match self {
            Measurement::InstantPower => record.instant_power,
            Measurement::InstantReactivePower => record.instant_reactive_power,
            Measurement::InstantApparentPower => match mapping {
                FieldMapping::Strict => record.instant_apparent_power,
                FieldMapping::Compatible => record.instant_reactive_power,
            },
            Measurement::Frequency => record.frequency,
            Measurement::EnergyExported => record.energy_exported,
            Measurement::EnergyImported => record.energy_imported,
            Measurement::InstantAverageVoltage => record.instant_average_voltage,
            Measurement::InstantTotalCurrent => record.instant_total_current,
        }
    }
}

/// Suffix of the unlabeled battery charge gauge.
pub const BATTERY_PERCENTAGE: &str = "battery_percentage";

/// Set the eight per-source gauges for one record.
pub fn populate_source(
    set: &mut MetricSet,
    source: Source,
    record: &EnergyRecord,
    mapping: FieldMapping,
) -> Result<()> {
    for measurement in Measurement::ALL {
        set.define_or_get(
            measurement.suffix(),
            measurement.help(),
            InstrumentKind::GaugeFamily,
        )?
        .set_with_labels(
            &[(SOURCE_LABEL, source.as_str())],
            measurement.read(record, mapping),
        );
    }
    Ok(())
}

/// Build the metric set for one scrape.
pub fn build_metric_set(
    namespace: &str,
    snapshot: &StatusSnapshot,
    soe: &StateOfEnergyReading,
    mapping: FieldMapping,
) -> Result<MetricSet> {
    let mut set = MetricSet::new(namespace);

    for (source, record) in snapshot.records() {
        populate_source(&mut set, source, record, mapping)?;
    }

    set.define_or_get(
        BATTERY_PERCENTAGE,
        "Battery charge as a percentage of capacity",
        InstrumentKind::Gauge,
    )?
    .set(soe.percentage);

    debug!(
        instruments = set.instrument_count(),
        samples = set.sample_count(),
        ?mapping,
        "Built metric set"
    );

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(base: f64) -> EnergyRecord {
        EnergyRecord {
            last_communication_time: DateTime::parse_from_rfc3339("2024-05-01T12:00:00+02:00")
                .unwrap(),
            instant_power: base + 1.0,
            instant_reactive_power: base + 2.0,
            instant_apparent_power: base + 3.0,
            frequency: base + 4.0,
            energy_exported: base + 5.0,
            energy_imported: base + 6.0,
            instant_average_voltage: base + 7.0,
            instant_total_current: base + 8.0,
            timeout: 1_500_000_000,
        }
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            site: record(100.0),
            battery: record(200.0),
            load: record(300.0),
            solar: record(400.0),
        }
    }

    #[test]
    fn test_build_metric_set_sample_count() {
        let soe = StateOfEnergyReading { percentage: 87.5 };
        let set = build_metric_set("tesla_powerwall", &snapshot(), &soe, FieldMapping::Strict)
            .unwrap();

        assert_eq!(set.instrument_count(), 9);
        assert_eq!(set.sample_count(), 33);
        assert_eq!(set.value(BATTERY_PERCENTAGE, &[]), Some(87.5));
    }

    #[test]
    fn test_strict_mapping_reads_own_fields() {
        let soe = StateOfEnergyReading { percentage: 50.0 };
        let set = build_metric_set("ns", &snapshot(), &soe, FieldMapping::Strict).unwrap();

        let expected = [
            ("instant_power", 1.0),
            ("instant_reactive_power", 2.0),
            ("instant_apparent_power", 3.0),
            ("frequency", 4.0),
            ("energy_exported", 5.0),
            ("energy_imported", 6.0),
            ("instant_average_voltage", 7.0),
            ("instant_total_current", 8.0),
        ];

        for source in Source::ALL {
            let base = snapshot().record(source).instant_power - 1.0;
            for (suffix, offset) in expected {
                assert_eq!(
                    set.value(suffix, &[(SOURCE_LABEL, source.as_str())]),
                    Some(base + offset),
                    "{suffix} for {source}"
                );
            }
        }
    }

    #[test]
    fn test_compatible_mapping_apparent_power_from_reactive() {
        let soe = StateOfEnergyReading { percentage: 50.0 };
        let set = build_metric_set("ns", &snapshot(), &soe, FieldMapping::Compatible).unwrap();

        assert_eq!(
            set.value("instant_apparent_power", &[(SOURCE_LABEL, "solar")]),
            Some(402.0)
        );
        // Current is read from its own field in both modes
        assert_eq!(
            set.value("instant_total_current", &[(SOURCE_LABEL, "solar")]),
            Some(408.0)
        );
    }

    #[test]
    fn test_populate_source_twice_reuses_instruments() {
        let mut set = MetricSet::new("ns");
        let mut rec = record(0.0);

        populate_source(&mut set, Source::Battery, &rec, FieldMapping::Strict).unwrap();
        rec.instant_power = 999.0;
        populate_source(&mut set, Source::Battery, &rec, FieldMapping::Strict).unwrap();

        assert_eq!(set.instrument_count(), 8);
        assert_eq!(set.sample_count(), 8);
        assert_eq!(
            set.value("instant_power", &[(SOURCE_LABEL, "battery")]),
            Some(999.0)
        );
    }

    #[test]
    fn test_battery_percentage_is_unlabeled() {
        let soe = StateOfEnergyReading { percentage: 12.25 };
        let set = build_metric_set("ns", &snapshot(), &soe, FieldMapping::Strict).unwrap();

        let output = set.render_classic();
        assert!(output.contains("\nns_battery_percentage 12.25\n"));
    }
}
