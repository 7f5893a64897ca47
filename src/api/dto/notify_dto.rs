//! Request and response bodies for the notification endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{DeliveryReport, RegistryStats, RouteReport};

/// Body of `POST /notify/session/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NotifySessionRequest {
    /// Event name. Required and non-blank.
    #[serde(default)]
    pub event: String,
    /// Opaque event body forwarded to subscribers.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl NotifySessionRequest {
    /// Decodes a request body, accepting only a JSON object.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] for anything else.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(raw)?;
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

/// Response of `POST /notify/session/{id}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotifySessionResponse {
    /// Always `true` on success.
    pub ok: bool,
    /// `true` when the event went to the relay instead of local members.
    pub relayed: bool,
    /// Enqueue tally for the session's local members. Absent when relayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,
}

/// Response of `POST /api/v1/events`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublishEventResponse {
    /// Always `true` on success.
    pub ok: bool,
    /// `true` when the envelope went to the relay instead of being routed here.
    pub relayed: bool,
    /// What routing the envelope produced. Absent when relayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteReport>,
}

/// Response of `GET /stats`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Registry counters.
    pub registry: RegistryStats,
    /// Upgrades currently holding a connection permit.
    pub admitted_connections: usize,
}
