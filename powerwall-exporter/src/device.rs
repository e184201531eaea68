//! Client for the Powerwall gateway's local REST API.
//!
//! The gateway serves a self-signed certificate on the local network, so
//! certificate verification is off unless `device.accept_invalid_certs` is
//! set to false.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{ExporterError, Result};
use crate::model::{StateOfEnergyReading, StatusSnapshot};

/// Path of the aggregated meters endpoint.
pub const METERS_AGGREGATES_PATH: &str = "/api/meters/aggregates";

/// Path of the state-of-energy endpoint.
pub const STATE_OF_ENERGY_PATH: &str = "/api/system_status/soe";

/// HTTP client for Powerwall gateways.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    scheme: String,
}

impl DeviceClient {
    /// Build a client from configuration.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.timeout())
            .build()
            .map_err(|source| ExporterError::Transport {
                endpoint: "client setup".to_string(),
                source,
            })?;

        Ok(Self {
            http,
            scheme: config.scheme.clone(),
        })
    }

    /// URL of `path` on the gateway at `target`.
    pub fn endpoint_url(&self, target: &str, path: &str) -> String {
        format!("{}://{}{}", self.scheme, target, path)
    }

    /// Fetch per-source meter readings.
    pub async fn fetch_aggregate_meters(&self, target: &str) -> Result<StatusSnapshot> {
        self.get_json(target, METERS_AGGREGATES_PATH).await
    }

    /// Fetch the battery state of energy.
    pub async fn fetch_state_of_energy(&self, target: &str) -> Result<StateOfEnergyReading> {
        self.get_json(target, STATE_OF_ENERGY_PATH).await
    }

    /// Fetch both readings concurrently, failing on the first error.
    pub async fn fetch_all(&self, target: &str) -> Result<(StatusSnapshot, StateOfEnergyReading)> {
        tokio::try_join!(
            self.fetch_aggregate_meters(target),
            self.fetch_state_of_energy(target)
        )
    }

    async fn get_json<T: DeserializeOwned + std::fmt::Debug>(
        &self,
        target: &str,
        path: &str,
    ) -> Result<T> {
        let endpoint = self.endpoint_url(target, path);

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|source| ExporterError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::DeviceStatus { endpoint, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ExporterError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        let decoded: T = serde_json::from_slice(&body)
            .map_err(|source| ExporterError::Decode { endpoint: endpoint.clone(), source })?;

        debug!(%endpoint, bytes = body.len(), reading = ?decoded, "Decoded gateway response");
        Ok(decoded)
    }
}
