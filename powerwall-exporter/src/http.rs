//! HTTP server for the probe endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ExporterConfig;
use crate::device::DeviceClient;
use crate::error::ExporterError;
use crate::registry::Encoding;
use crate::translator::{FieldMapping, build_metric_set};

/// Body returned when `/probe` is called without a target.
pub const MISSING_TARGET_BODY: &str = "You must provide a target parameter.";

/// Application state shared across handlers.
///
/// Holds no metric state; each scrape builds its own registry.
#[derive(Clone)]
pub struct ProbeState {
    client: DeviceClient,
    namespace: String,
    field_mapping: FieldMapping,
    enable_openmetrics: bool,
}

impl ProbeState {
    pub fn new(client: DeviceClient, config: &ExporterConfig) -> Self {
        Self {
            client,
            namespace: config.prometheus.namespace.clone(),
            field_mapping: config.translator.field_mapping,
            enable_openmetrics: config.prometheus.enable_openmetrics,
        }
    }

    /// Fetch, translate and encode readings for one target.
    async fn scrape(&self, target: &str, encoding: Encoding) -> Result<String, ExporterError> {
        let (snapshot, soe) = self.client.fetch_all(target).await?;
        let set = build_metric_set(&self.namespace, &snapshot, &soe, self.field_mapping)?;
        Ok(set.encode(encoding)?)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    target: Option<String>,
}

impl IntoResponse for ExporterError {
    fn into_response(self) -> Response {
        match self {
            ExporterError::MissingParameter(_) => {
                (self.status_code(), MISSING_TARGET_BODY).into_response()
            }
            // Details stay in the server log
            _ => self.status_code().into_response(),
        }
    }
}

/// Create the HTTP router.
///
/// Any path other than `/probe` and `/health` answers like `/`.
pub fn create_router(state: ProbeState) -> Router {
    Router::new()
        .route("/probe", get(probe_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .fallback(root_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for the /probe endpoint.
async fn probe_handler(
    State(state): State<ProbeState>,
    Query(params): Query<ProbeParams>,
    headers: HeaderMap,
) -> Result<Response, ExporterError> {
    let target = match params.target.as_deref().map(str::trim) {
        Some(target) if !target.is_empty() => target.to_string(),
        _ => {
            warn!("Probe request without target");
            return Err(ExporterError::MissingParameter("target"));
        }
    };

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let encoding = Encoding::negotiate(accept, state.enable_openmetrics);

    match state.scrape(&target, encoding).await {
        Ok(body) => {
            info!(%target, ?encoding, "Probe succeeded");
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoding.content_type())],
                body,
            )
                .into_response())
        }
        Err(e) => {
            error!(%target, error = %e, "Probe failed");
            Err(e)
        }
    }
}

/// Handler for the / endpoint and unmatched paths.
async fn root_handler() -> StatusCode {
    StatusCode::OK
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    state: ProbeState,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(state: ProbeState, listen_addr: SocketAddr) -> Self {
        Self { state, listen_addr }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(addr = %self.listen_addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        serve(listener, self.state, shutdown).await
    }
}

/// Serve on an already bound listener until the shutdown signal is received.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: ProbeState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let router = create_router(state);

    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            // Wait for shutdown signal
            loop {
                if shutdown.changed().await.is_err() {
                    break;
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_router() -> Router {
        let config = ExporterConfig::default();
        let client = DeviceClient::new(&config.device).unwrap();
        create_router(ProbeState::new(client, &config))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let response = make_router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = make_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_probe_without_target() {
        let response = make_router()
            .oneshot(Request::get("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, MISSING_TARGET_BODY);
    }

    #[tokio::test]
    async fn test_probe_with_empty_target() {
        let response = make_router()
            .oneshot(Request::get("/probe?target=").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_path_answers_like_root() {
        for path in ["/metrics", "/probe/extra", "/favicon.ico"] {
            let response = make_router()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "{path}");
            assert!(body_string(response).await.is_empty());
        }
    }

    #[test]
    fn test_error_response_hides_details() {
        let err = ExporterError::Encode(std::fmt::Error);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
