//! Health and metrics endpoints.

use age_saga_runtime::metrics::MetricsExporter;
use axum::{
    Json,
    http::{StatusCode, header},
    routing::{MethodRouter, get},
};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check.
///
/// Returns 200 OK while the process is serving requests. Dependencies
/// (database, bus) are not probed.
///
/// ```text
/// GET /health
/// {"status":"UP","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "UP".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /metrics` route rendering `exporter` in Prometheus text format.
pub fn metrics_route<S>(exporter: MetricsExporter) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    get(move || {
        let body = exporter.render();
        async move { ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "UP");
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn metrics_route_renders_prometheus_text() {
        use tower::ServiceExt;

        let exporter = MetricsExporter::install().expect("install");
        age_saga_runtime::metrics::SagaMetrics::record_person_created();

        let app: axum::Router = axum::Router::new().route("/metrics", metrics_route(exporter));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/metrics")
                    .body(axum::body::Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("saga_persons_created_total"));
    }
}
