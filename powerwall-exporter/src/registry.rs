//! Per-scrape metric registry and exposition encoders.
//!
//! A [`MetricSet`] is built fresh for every scrape and dropped once the
//! response body is written. Instruments are looked up by name, so defining
//! the same gauge twice hands back the existing descriptor instead of failing.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::trace;

use crate::error::{ExporterError, Result};

/// Content type of the classic Prometheus text format.
pub const CLASSIC_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the OpenMetrics text format.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Sorted label key-value pairs identifying one sample.
pub type LabelSet = Vec<(String, String)>;

/// Shape of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Single gauge without labels.
    Gauge,
    /// Gauge with one sample per label set.
    GaugeFamily,
}

/// Exposition format negotiated with the scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Classic,
    OpenMetrics,
}

impl Encoding {
    /// Pick an encoding from an `Accept` header value.
    ///
    /// OpenMetrics is chosen when one of the media ranges names it with a
    /// nonzero quality.
    pub fn negotiate(accept: Option<&str>, openmetrics_enabled: bool) -> Self {
        let Some(accept) = accept.filter(|_| openmetrics_enabled) else {
            return Encoding::Classic;
        };

        let wants_openmetrics = accept.split(',').any(|range| {
            let mut parts = range.split(';').map(str::trim);
            let media_type = parts.next().unwrap_or_default();
            media_type.eq_ignore_ascii_case("application/openmetrics-text")
                && quality(parts) > 0.0
        });

        if wants_openmetrics {
            Encoding::OpenMetrics
        } else {
            Encoding::Classic
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Classic => CLASSIC_CONTENT_TYPE,
            Encoding::OpenMetrics => OPENMETRICS_CONTENT_TYPE,
        }
    }
}

/// Quality value among media range parameters; 1 when absent or unparsable.
fn quality<'a>(params: impl Iterator<Item = &'a str>) -> f32 {
    for param in params {
        if let Some((key, value)) = param.split_once('=')
            && key.trim().eq_ignore_ascii_case("q")
        {
            return value.trim().parse().unwrap_or(1.0);
        }
    }
    1.0
}

#[derive(Debug)]
struct Descriptor {
    name: String,
    help: String,
    kind: InstrumentKind,
    samples: BTreeMap<LabelSet, f64>,
}

/// Handle to an instrument owned by a [`MetricSet`].
#[derive(Debug)]
pub struct Instrument<'a> {
    descriptor: &'a mut Descriptor,
}

impl Instrument<'_> {
    /// Instrument name including the namespace.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.descriptor.kind
    }

    /// Overwrite the value of an unlabeled gauge.
    pub fn set(&mut self, value: f64) {
        debug_assert_eq!(
            self.descriptor.kind,
            InstrumentKind::Gauge,
            "unlabeled sample on {}",
            self.descriptor.name
        );
        self.descriptor.samples.insert(Vec::new(), value);
    }

    /// Overwrite the sample identified by `labels`.
    pub fn set_with_labels(&mut self, labels: &[(&str, &str)], value: f64) {
        debug_assert_eq!(
            self.descriptor.kind,
            InstrumentKind::GaugeFamily,
            "labeled sample on {}",
            self.descriptor.name
        );
        let mut key: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        key.sort_by(|a, b| a.0.cmp(&b.0));
        self.descriptor.samples.insert(key, value);
    }
}

/// Metric registry scoped to a single scrape.
#[derive(Debug)]
pub struct MetricSet {
    namespace: String,
    descriptors: BTreeMap<String, Descriptor>,
}

impl MetricSet {
    /// Create an empty set whose instrument names start with `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            descriptors: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full instrument name for a measurement suffix.
    pub fn metric_name(&self, suffix: &str) -> String {
        if self.namespace.is_empty() {
            suffix.to_string()
        } else {
            format!("{}_{}", self.namespace, suffix)
        }
    }

    /// Define an instrument, or return the existing one with the same name.
    ///
    /// Redefining a name with the same kind keeps the first descriptor and its
    /// samples. Redefining it with a different kind is a
    /// [`ExporterError::RegistrationConflict`].
    pub fn define_or_get(
        &mut self,
        suffix: &str,
        help: &str,
        kind: InstrumentKind,
    ) -> Result<Instrument<'_>> {
        let name = self.metric_name(suffix);

        if let Some(existing) = self.descriptors.get(&name)
            && existing.kind != kind
        {
            return Err(ExporterError::RegistrationConflict {
                name,
                existing: existing.kind,
                requested: kind,
            });
        }

        let descriptor = self.descriptors.entry(name).or_insert_with_key(|name| {
            trace!(metric = %name, ?kind, "Defining instrument");
            Descriptor {
                name: name.clone(),
                help: help.to_string(),
                kind,
                samples: BTreeMap::new(),
            }
        });

        Ok(Instrument { descriptor })
    }

    /// Number of defined instruments.
    pub fn instrument_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Number of samples across all instruments.
    pub fn sample_count(&self) -> usize {
        self.descriptors.values().map(|d| d.samples.len()).sum()
    }

    /// Current value of a sample, if set.
    pub fn value(&self, suffix: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let descriptor = self.descriptors.get(&self.metric_name(suffix))?;
        let mut key: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        key.sort_by(|a, b| a.0.cmp(&b.0));
        descriptor.samples.get(&key).copied()
    }

    /// Encode in the requested exposition format.
    pub fn encode(&self, encoding: Encoding) -> std::result::Result<String, std::fmt::Error> {
        match encoding {
            Encoding::Classic => Ok(self.render_classic()),
            Encoding::OpenMetrics => self.render_openmetrics(),
        }
    }

    /// Render in the classic Prometheus text format.
    pub fn render_classic(&self) -> String {
        let mut output = String::with_capacity(self.sample_count() * 100);

        for descriptor in self.descriptors.values() {
            // prometheus-client terminates HELP with a period; match it here
            writeln!(
                output,
                "# HELP {} {}.",
                descriptor.name,
                escape_help(&descriptor.help)
            )
            .ok();
            writeln!(output, "# TYPE {} gauge", descriptor.name).ok();

            for (labels, value) in &descriptor.samples {
                writeln!(
                    output,
                    "{}{} {}",
                    descriptor.name,
                    format_labels(labels),
                    format_value(*value)
                )
                .ok();
            }
        }

        output
    }

    /// Render in the OpenMetrics text format.
    pub fn render_openmetrics(&self) -> std::result::Result<String, std::fmt::Error> {
        let mut registry = Registry::default();

        for descriptor in self.descriptors.values() {
            match descriptor.kind {
                InstrumentKind::Gauge => {
                    let gauge = Gauge::<f64, AtomicU64>::default();
                    if let Some(value) = descriptor.samples.get(&Vec::new()) {
                        gauge.set(*value);
                    }
                    registry.register(descriptor.name.clone(), descriptor.help.clone(), gauge);
                }
                InstrumentKind::GaugeFamily => {
                    let family = Family::<LabelSet, Gauge<f64, AtomicU64>>::default();
                    for (labels, value) in &descriptor.samples {
                        family.get_or_create(labels).set(*value);
                    }
                    registry.register(descriptor.name.clone(), descriptor.help.clone(), family);
                }
            }
        }

        let mut output = String::new();
        encode(&mut output, &registry)?;
        Ok(output)
    }
}

/// Check that `name` is a valid Prometheus metric name.
///
/// Names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
