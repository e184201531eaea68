//! Configuration for the Powerwall exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::registry::is_valid_metric_name;
use crate::translator::FieldMapping;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Metric naming and exposition settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Outbound calls to the gateway.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Reading-to-metric mapping.
    #[serde(default)]
    pub translator: TranslatorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

/// Metric naming and exposition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Metric name prefix (default: "tesla_powerwall").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Answer with OpenMetrics when the scraper asks for it (default: true).
    #[serde(default = "default_true")]
    pub enable_openmetrics: bool,
}

fn default_namespace() -> String {
    "tesla_powerwall".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            enable_openmetrics: true,
        }
    }
}

/// Gateway client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// URL scheme used to reach the gateway: "https" or "http".
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Upper bound for each request to the gateway (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Accept the gateway's self-signed certificate (default: true).
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            timeout_ms: default_timeout_ms(),
            accept_invalid_certs: true,
        }
    }
}

/// Translator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Which record field feeds each gauge.
    #[serde(default)]
    pub field_mapping: FieldMapping,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.listen
            )));
        }

        if !is_valid_metric_name(&self.prometheus.namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {}",
                self.prometheus.namespace
            )));
        }

        if self.device.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.device.scheme != "https" && self.device.scheme != "http" {
            return Err(ConfigError::Validation(format!(
                "Unsupported scheme: {} (expected http or https)",
                self.device.scheme
            )));
        }

        Ok(())
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            prometheus: PrometheusConfig::default(),
            device: DeviceConfig::default(),
            translator: TranslatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
