//! Health and metrics endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use datasync_core::SharedMetricsRegistry;

/// State shared by the ops routes.
#[derive(Clone)]
pub struct OpsState {
    pub metrics: SharedMetricsRegistry,
}

impl OpsState {
    pub fn new(metrics: SharedMetricsRegistry) -> Self {
        Self { metrics }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub events_received: u64,
}

/// Create the router serving `/health` and `/metrics`.
pub fn create_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<OpsState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.metrics.uptime_secs(),
        events_received: state.metrics.received(),
    })
}

async fn prometheus_metrics(State(state): State<OpsState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use datasync_core::new_shared_registry;

    #[tokio::test]
    async fn test_health() {
        let metrics = new_shared_registry();
        metrics.record_received();
        let server = TestServer::new(create_router(OpsState::new(metrics))).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["events_received"], 1);
    }

    #[tokio::test]
    async fn test_metrics_export() {
        let metrics = new_shared_registry();
        metrics.record_received();
        metrics.record_ignored();
        let server = TestServer::new(create_router(OpsState::new(metrics))).unwrap();

        let response = server.get("/metrics").await;
        response.assert_status_ok();
        let text = response.text();
        assert!(text.contains("datasync_events_received_total 1"));
        assert!(text.contains("datasync_events_ignored_total 1"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let server = TestServer::new(create_router(OpsState::new(new_shared_registry()))).unwrap();
        server.get("/nope").expect_failure().await.assert_status_not_found();
    }
}
