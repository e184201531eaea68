//! Error types for the exporter.

use axum::http::StatusCode;
use thiserror::Error;

use crate::registry::InstrumentKind;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised while serving a scrape.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The device could not be reached or the request did not complete.
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The device answered with a non-success status.
    #[error("{endpoint} responded with HTTP {status}")]
    DeviceStatus {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    /// The device body is not JSON of the expected shape.
    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// An instrument name was redefined with a different kind.
    #[error("Metric {name} already defined as {existing:?}, cannot redefine as {requested:?}")]
    RegistrationConflict {
        name: String,
        existing: InstrumentKind,
        requested: InstrumentKind,
    },

    /// The metric set could not be written out.
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),

    /// A required query parameter is absent or empty.
    #[error("Missing query parameter: {0}")]
    MissingParameter(&'static str),
}

impl ExporterError {
    /// HTTP status a handler answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
