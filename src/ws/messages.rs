//! Inbound WebSocket control frames.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Control record a client sends to join or leave a session.
///
/// ```json
/// {"subscribe_session": "6f1c2a8e-9d4b-4c55-8a77-0b6f3e2d1c90"}
/// ```
///
/// Both fields may be set in one frame; the subscribe is applied first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlFrame {
    /// Session to join.
    #[serde(default)]
    pub subscribe_session: Option<String>,
    /// Session to leave.
    #[serde(default)]
    pub unsubscribe_session: Option<String>,
}

impl ControlFrame {
    /// Decodes a frame, returning `None` if `raw` is not a control record
    /// or carries neither field.
    #[must_use]
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let object: Map<String, Value> = serde_json::from_slice(raw).ok()?;
        serde_json::from_value::<Self>(Value::Object(object))
            .ok()
            .filter(|frame| !frame.is_empty())
    }

    /// Returns `true` when neither field carries a non-blank value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let blank = |field: &Option<String>| field.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.subscribe_session) && blank(&self.unsubscribe_session)
    }
}
