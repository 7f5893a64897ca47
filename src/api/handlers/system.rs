//! System endpoints: health, readiness and hub statistics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::dto::StatsResponse;
use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// Readiness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    ready: bool,
    connections: usize,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /ready`: Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "System",
    summary = "Readiness probe",
    description = "Reports that the hub accepts connections, with the current connection count.",
    responses(
        (status = 200, description = "Hub is ready", body = ReadyResponse),
    )
)]
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.registry.connection_count().await;
    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            connections,
        }),
    )
}

/// `GET /stats`: Registry counters.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "System",
    summary = "Hub statistics",
    description = "Connections, sessions, regions and roles currently indexed, plus enqueue and drop totals since startup.",
    responses(
        (status = 200, description = "Current counters", body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.stats().await;
    (
        StatusCode::OK,
        Json(StatsResponse {
            registry,
            admitted_connections: state.limits.active(),
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/stats", get(stats_handler))
}
