//! Ingress handlers: push events into the hub over HTTP.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;

use crate::api::dto::{NotifySessionRequest, NotifySessionResponse, PublishEventResponse};
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::{ErrorResponse, HubError};
use crate::source::Submitted;

/// `POST /notify/session/{id}`: Broadcast an event to a session.
///
/// # Errors
///
/// Returns [`HubError::InvalidSessionId`] for a malformed id,
/// [`HubError::InvalidRequest`] when the body is not valid or `event` is
/// blank, and [`HubError::RelayUnavailable`] if a configured relay fails.
#[utoipa::path(
    post,
    path = "/notify/session/{id}",
    tag = "Notify",
    summary = "Notify a session",
    description = "Delivers `{event, payload}` to every client subscribed to the session. Clients whose queues are full miss the event. With a relay configured, the event is published as a session envelope for every instance to route.",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = NotifySessionRequest,
    responses(
        (status = 200, description = "Event enqueued", body = NotifySessionResponse),
        (status = 400, description = "Invalid session id or body", body = ErrorResponse),
        (status = 503, description = "Relay unavailable", body = ErrorResponse),
    )
)]
pub async fn notify_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, HubError> {
    let session_id: SessionId = id
        .parse()
        .map_err(|_| HubError::InvalidSessionId(id.clone()))?;
    let req = NotifySessionRequest::decode(&body)
        .map_err(|e| HubError::InvalidRequest(e.to_string()))?;
    if req.event.trim().is_empty() {
        return Err(HubError::InvalidRequest("event is required".to_string()));
    }

    if state.ingress.is_relayed() {
        let envelope = serde_json::json!({
            "event": req.event,
            "payload": req.payload,
            "session_id": session_id,
        });
        let encoded =
            serde_json::to_vec(&envelope).map_err(|e| HubError::Internal(e.to_string()))?;
        state.ingress.submit(Bytes::from(encoded)).await?;
        tracing::info!(%session_id, event = %req.event, "session notification relayed");
        return Ok((
            StatusCode::OK,
            Json(NotifySessionResponse {
                ok: true,
                relayed: true,
                delivery: None,
            }),
        ));
    }

    let message = serde_json::json!({ "event": req.event, "payload": req.payload });
    let encoded =
        serde_json::to_vec(&message).map_err(|e| HubError::Internal(e.to_string()))?;
    let delivery = state
        .registry
        .broadcast_to_session(session_id, Bytes::from(encoded))
        .await;

    tracing::info!(
        %session_id,
        event = %req.event,
        enqueued = delivery.enqueued,
        dropped = delivery.dropped,
        "session notified"
    );
    Ok((
        StatusCode::OK,
        Json(NotifySessionResponse {
            ok: true,
            relayed: false,
            delivery: Some(delivery),
        }),
    ))
}

/// `POST /api/v1/events`: Route a raw event envelope.
///
/// # Errors
///
/// Returns [`HubError::MalformedEnvelope`] if the body is not an envelope,
/// or [`HubError::RelayUnavailable`] if a configured relay fails.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Notify",
    summary = "Publish an envelope",
    description = "Routes an envelope exactly as the event source would, or publishes it to the relay when one is configured. The request body is forwarded verbatim to every resolved target.",
    request_body = crate::domain::Envelope,
    responses(
        (status = 202, description = "Envelope routed", body = PublishEventResponse),
        (status = 400, description = "Malformed envelope", body = ErrorResponse),
        (status = 503, description = "Relay unavailable", body = ErrorResponse),
    )
)]
pub async fn publish_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, HubError> {
    let response = match state.ingress.submit(body).await? {
        Submitted::Routed(route) => PublishEventResponse {
            ok: true,
            relayed: false,
            route: Some(route),
        },
        Submitted::Relayed => PublishEventResponse {
            ok: true,
            relayed: true,
            route: None,
        },
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Session notification route, mounted at the root.
pub fn session_routes() -> Router<AppState> {
    Router::new().route("/notify/session/{id}", post(notify_session))
}

/// Envelope ingress routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", post(publish_event))
}
