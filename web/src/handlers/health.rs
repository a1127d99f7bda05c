//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::{AppError, WebResult};
use axum::{Json, extract::State, http::StatusCode};
use courier_runtime::{DispatchState, HealthCheck, HealthReport, MetricsExporter};
use std::sync::Arc;
use tokio::sync::watch;

/// Read side of the dispatch loop's state channel.
///
/// Put it in the router state (directly or through `FromRef`) to serve
/// [`readiness`].
#[derive(Clone, Debug)]
pub struct ReadinessWatch(watch::Receiver<DispatchState>);

impl ReadinessWatch {
    /// Wrap a receiver obtained from `DispatchLoop::state()`.
    #[must_use]
    pub const fn new(state: watch::Receiver<DispatchState>) -> Self {
        Self(state)
    }

    /// Current dispatch loop state.
    #[must_use]
    pub fn current(&self) -> DispatchState {
        *self.0.borrow()
    }
}

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the process is running. Does NOT look at the
/// event bus or the staging store.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: is this replica consuming the broadcast bus?
///
/// A replica that is not dispatching cannot complete a request that waits
/// on an event, so it reports 503 until its subscription is live.
///
/// # Status Codes
///
/// - 200 OK: dispatch loop is `Dispatching`
/// - 503 Service Unavailable: connecting, subscribed but idle, or stopped
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "degraded",
///   "checks": [{ "component": "dispatch_loop", "status": "degraded", "message": "Connecting" }],
///   "timestamp": "2024-01-01T00:00:00Z"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(
    State(dispatch): State<ReadinessWatch>,
) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::new(vec![HealthCheck::dispatch(dispatch.current())]);

    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

/// Prometheus scrape endpoint.
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// 503 when no recorder was installed at startup.
#[allow(clippy::unused_async)]
pub async fn metrics(State(exporter): State<Arc<MetricsExporter>>) -> WebResult<String> {
    exporter
        .render()
        .ok_or_else(|| AppError::unavailable("Metrics recorder not installed"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use axum_test::TestServer;
    use serde_json::Value;

    fn server(state: watch::Receiver<DispatchState>) -> TestServer {
        let app = Router::new()
            .route("/health", get(health_check))
            .route("/health/ready", get(readiness))
            .with_state(ReadinessWatch::new(state));
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn liveness_ignores_dispatch_state() {
        let (_tx, rx) = watch::channel(DispatchState::Disconnected);
        let response = server(rx).get("/health").await;

        response.assert_status_ok();
        response.assert_text("ok");
    }

    #[tokio::test]
    async fn ready_only_while_dispatching() {
        let (tx, rx) = watch::channel(DispatchState::Connecting);
        let server = server(rx);

        let response = server.get("/health/ready").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"][0]["component"], "dispatch_loop");

        tx.send_replace(DispatchState::Dispatching);
        let response = server.get("/health/ready").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn stopped_loop_is_unhealthy() {
        let (_tx, rx) = watch::channel(DispatchState::Disconnected);
        let response = server(rx).get("/health/ready").await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["status"], "unhealthy");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let err = metrics(State(Arc::new(MetricsExporter::new())))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
