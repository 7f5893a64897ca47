//! Axum WebSocket upgrade handler.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::{ClientId, ClientMetadata};
use crate::error::HubError;

/// Connection attributes supplied as query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    /// Region the client belongs to.
    pub region: Option<String>,
    /// Comma-separated roles held by the client.
    pub roles: Option<String>,
}

/// `GET /ws/notify/{user_id}`: Upgrade to a notification stream.
///
/// # Errors
///
/// Returns [`HubError::InvalidClientId`] for a malformed `user_id` and
/// [`HubError::ConnectionLimitExceeded`] when the caller is over a limit.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Response, HubError> {
    let client_id: ClientId = user_id
        .parse()
        .map_err(|_| HubError::InvalidClientId(user_id.clone()))?;

    let ip = client_ip(&headers, peer);
    let permit = state
        .limits
        .try_acquire(ip)
        .ok_or(HubError::ConnectionLimitExceeded)?;

    let metadata = ClientMetadata::from_params(params.region.as_deref(), params.roles.as_deref());
    let registry = Arc::clone(&state.registry);
    tracing::info!(%client_id, %ip, region = metadata.region(), "websocket upgrade");

    Ok(ws
        .on_upgrade(move |socket| async move {
            run_connection(socket, client_id, metadata, registry).await;
            drop(permit);
        })
        .into_response())
}

/// Resolves the caller's address: first `x-forwarded-for` entry, then
/// `x-real-ip`, then the socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    forwarded
        .into_iter()
        .chain(real_ip)
        .find_map(|candidate| candidate.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}
