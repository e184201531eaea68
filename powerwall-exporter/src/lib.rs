//! Prometheus probe exporter for the Tesla Powerwall.
//!
//! Each scrape of `/probe?target=<host>` queries the gateway's local API,
//! translates the readings into gauges and answers in the Prometheus text
//! format (or OpenMetrics when the scraper asks for it).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    Scraper      │────>│   HTTP Server   │────>│  Device Client  │──> gateway
//! │ (/probe?target) │<────│    (/probe)     │<────│  (meters, soe)  │<──
//! └─────────────────┘     └────────┬────────┘     └─────────────────┘
//!                                  │
//!                         ┌────────▼────────┐
//!                         │   Translator    │
//!                         │  (MetricSet)    │
//!                         └─────────────────┘
//! ```
//!
//! Nothing is kept between scrapes: every request builds and drops its own
//! [`registry::MetricSet`].
//!
//! # Usage
//!
//! ```bash
//! powerwall-exporter --config powerwall.json5
//! curl 'http://localhost:8080/probe?target=192.168.1.20'
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod model;
pub mod registry;
pub mod translator;

pub use config::ExporterConfig;
pub use device::DeviceClient;
pub use error::{ExporterError, Result};
pub use http::{HttpServer, ProbeState, create_router};
pub use model::{EnergyRecord, Source, StateOfEnergyReading, StatusSnapshot};
pub use registry::{Encoding, MetricSet};
pub use translator::{FieldMapping, build_metric_set};

use config::{LogFormat, LoggingConfig};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
