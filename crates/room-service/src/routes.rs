//! HTTP surface: health, metrics and read-only monitoring.

use crate::errors::RoomError;
use crate::monitor::{CallsSummary, Monitor, RoomStats};
use crate::observability::{health_router, HealthState};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the application routes.
///
/// - `/health`, `/ready`: probes
/// - `/metrics`: Prometheus exposition
/// - `/api/v1/monitor/rooms/:token`: presence counts of one conversation
/// - `/api/v1/monitor/calls`: call activity across conversations
pub fn build_routes(
    monitor: Arc<Monitor>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    let monitor_routes = Router::new()
        .route("/api/v1/monitor/rooms/:token", get(room_stats))
        .route("/api/v1/monitor/calls", get(calls_summary))
        .with_state(monitor);

    health_router(health_state)
        .merge(metrics_routes)
        .merge(monitor_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[tracing::instrument(skip_all, name = "rs.metrics.scrape")]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

#[tracing::instrument(skip_all, name = "rs.monitor.room")]
async fn room_stats(
    State(monitor): State<Arc<Monitor>>,
    Path(token): Path<String>,
) -> Result<Json<RoomStats>, RoomError> {
    monitor.room_stats(&token).await.map(Json)
}

#[tracing::instrument(skip_all, name = "rs.monitor.calls")]
async fn calls_summary(State(monitor): State<Arc<Monitor>>) -> Result<Json<CallsSummary>, RoomError> {
    monitor.calls_summary().await.map(Json)
}
