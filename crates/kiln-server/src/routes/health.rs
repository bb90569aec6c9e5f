use axum::extract::State;
use axum::{Json, Router, routing::get};
use kiln_core::app::QueueCounts;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the state store answers.
    pub store_healthy: bool,
    /// Admission queue and worker counters.
    pub queue: QueueCounts,
}

/// GET /health -- returns service and state store health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.orchestrator.health().await;

    let status = if report.store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy: report.store_healthy,
        queue: report.queue,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
