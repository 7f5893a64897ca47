//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the error surfaced by handlers and the event router.
//! Each variant maps to a specific HTTP status code and structured JSON
//! error response. [`ConfigError`] covers startup failures, which are
//! fatal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "invalid session id: abc"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status               |
/// |-----------|------------|---------------------------|
/// | 1000–1999 | Validation | 400 Bad Request           |
/// | 2000–2999 | Capacity   | 503 Service Unavailable   |
/// | 3000–3999 | Server     | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Client identifier failed to parse.
    #[error("invalid user_id: {0}")]
    InvalidClientId(String),

    /// Session identifier failed to parse.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Envelope bytes did not decode as a routing record.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    /// Per-IP or total WebSocket connection limit reached.
    #[error("connection limit exceeded")]
    ConnectionLimitExceeded,

    /// The cross-instance relay rejected a publish.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidClientId(_) => 1001,
            Self::InvalidSessionId(_) => 1002,
            Self::InvalidRequest(_) => 1003,
            Self::MalformedEnvelope(_) => 1004,
            Self::ConnectionLimitExceeded => 2001,
            Self::RelayUnavailable(_) => 2002,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClientId(_)
            | Self::InvalidSessionId(_)
            | Self::InvalidRequest(_)
            | Self::MalformedEnvelope(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionLimitExceeded | Self::RelayUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Startup configuration failure. Prevents the hub from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `LISTEN_ADDR` is not a socket address.
    #[error("LISTEN_ADDR {value:?} is not a socket address: {source}")]
    InvalidListenAddr {
        /// The offending value.
        value: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// `WS_SEND_QUEUE_SIZE` is beyond what a bounded channel can hold.
    #[error("WS_SEND_QUEUE_SIZE {value} exceeds the maximum of {max}")]
    SendQueueTooLarge {
        /// The configured capacity.
        value: usize,
        /// Largest accepted capacity.
        max: usize,
    },

    /// Topics are configured but there is nothing to consume them from.
    #[error("KAFKA_BROKERS required when KAFKA_TOPICS set")]
    MissingBrokers,
}
