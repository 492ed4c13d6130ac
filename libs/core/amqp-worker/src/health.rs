//! Health check handlers for broker workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`), ready only while `Connected`
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::connection::{BrokerClient, ConnectionState};
use crate::metrics;
use crate::topology::dead_letter_names;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Broker client whose connection state drives readiness.
    pub client: BrokerClient,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Queue consumed by this worker.
    pub queue: String,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        client: BrokerClient,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            client,
            app_name: app_name.into(),
            app_version: app_version.into(),
            queue: queue.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready while the broker connection is `Connected`. A reconnecting worker
/// reports 503 with its current state.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let connection = state.client.state();
    let broker: &'static str = connection.into();
    let names = dead_letter_names(&state.queue);
    let body = |status: &str| {
        Json(json!({
            "status": status,
            "checks": {
                "broker": broker,
            },
            "queue": state.queue,
            "dead_letter_queue": names.queue,
            "epoch": state.client.epoch(),
        }))
    };

    match connection {
        ConnectionState::Connected => Ok((StatusCode::OK, body("ready"))),
        _ => Err((StatusCode::SERVICE_UNAVAILABLE, body("not_ready"))),
    }
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// - `/health` - Liveness probe
/// - `/healthz` - Liveness probe (K8s style)
/// - `/ready` - Readiness probe
/// - `/readyz` - Readiness probe (K8s style)
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
