//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Envelope ingress lives under `/api/v1`; session notification and the
//! system probes are mounted at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "notify-hub", description = "Real-time notification fan-out hub"),
    paths(
        handlers::notify::notify_session,
        handlers::notify::publish_event,
        handlers::system::health_handler,
        handlers::system::ready_handler,
        handlers::system::stats_handler,
    ),
    components(schemas(
        dto::NotifySessionRequest,
        dto::NotifySessionResponse,
        dto::PublishEventResponse,
        dto::StatsResponse,
        crate::domain::Envelope,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "Notify", description = "Event ingress"),
        (name = "System", description = "Health and statistics"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::notify::session_routes())
        .merge(handlers::system::routes())
}
