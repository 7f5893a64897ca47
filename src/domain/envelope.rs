//! Event envelope: the routing record pushed by upstream producers.
//!
//! Every targeting field is optional. The envelope is only decoded to find
//! the targets; clients receive the producer's original bytes untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Decoded routing record.
///
/// `null` and missing fields are treated the same way, and `null` items
/// inside a list are skipped. A field of the wrong JSON type makes the
/// whole envelope malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    /// Event name, carried for logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Opaque event body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    /// Session whose subscribers receive the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Single direct recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Direct recipients.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_ids: Option<Vec<String>>,
    /// Single operator recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    /// Operator recipients.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub operator_ids: Option<Vec<String>>,
    /// Regions whose connected clients receive the event.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub regions: Option<Vec<String>>,
    /// Roles whose holders receive the event.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub roles: Option<Vec<String>>,
}

impl Envelope {
    /// Decodes an envelope from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if `raw` is not a JSON object of
    /// the expected shape. Arrays are rejected even when their items would
    /// line up with the fields.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let object: Map<String, Value> = serde_json::from_slice(raw)?;
        serde_json::from_value(Value::Object(object))
    }

    /// The session id string, if present and non-blank.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        non_blank(self.session_id.as_deref())
    }

    /// Every direct recipient string in merge order: `user_id`,
    /// `user_ids`, `operator_id`, `operator_ids`. Blank entries are skipped.
    pub fn direct_recipients(&self) -> impl Iterator<Item = &str> {
        let users = self.user_ids.iter().flatten().map(String::as_str);
        let operators = self.operator_ids.iter().flatten().map(String::as_str);
        self.user_id
            .as_deref()
            .into_iter()
            .chain(users)
            .chain(self.operator_id.as_deref())
            .chain(operators)
            .filter(|s| !s.trim().is_empty())
    }

    /// Requested regions (possibly empty).
    #[must_use]
    pub fn regions(&self) -> &[String] {
        self.regions.as_deref().unwrap_or_default()
    }

    /// Requested roles (possibly empty).
    #[must_use]
    pub fn roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or_default()
    }

    /// Returns `true` when no targeting field is populated.
    #[must_use]
    pub fn is_untargeted(&self) -> bool {
        self.session().is_none()
            && self.direct_recipients().next().is_none()
            && self.regions().is_empty()
            && self.roles().is_empty()
    }
}

/// A list of strings whose `null` items are dropped.
fn lenient_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Option<String>>>::deserialize(deserializer)?;
    Ok(items.map(|items| items.into_iter().flatten().collect()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_envelope() {
        let raw = br#"{
            "event": "session.ended",
            "payload": {"reason": "timeout"},
            "session_id": "6f1c2a8e-9d4b-4c55-8a77-0b6f3e2d1c90",
            "user_id": "a",
            "user_ids": ["b", "c"],
            "operator_id": "d",
            "operator_ids": ["e"],
            "regions": ["eu-west"],
            "roles": ["operator"]
        }"#;
        let Ok(env) = Envelope::decode(raw) else {
            panic!("envelope should decode");
        };
        assert_eq!(env.event.as_deref(), Some("session.ended"));
        assert_eq!(
            env.direct_recipients().collect::<Vec<_>>(),
            vec!["a", "b", "c", "d", "e"]
        );
        assert_eq!(env.regions(), ["eu-west".to_string()]);
        assert!(!env.is_untargeted());
    }

    #[test]
    fn nulls_are_absent() {
        let Ok(env) = Envelope::decode(br#"{"user_ids": null, "session_id": null}"#) else {
            panic!("nulls should decode");
        };
        assert!(env.is_untargeted());
    }

    #[test]
    fn null_list_items_are_skipped() {
        let Ok(env) = Envelope::decode(
            br#"{"user_ids": [null, "a"], "operator_ids": [null], "regions": ["eu", null], "roles": [null]}"#,
        ) else {
            panic!("null items should not reject the envelope");
        };
        assert_eq!(env.direct_recipients().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(env.regions(), ["eu".to_string()]);
        assert!(env.roles().is_empty());
    }

    #[test]
    fn blank_targets_are_ignored() {
        let Ok(env) = Envelope::decode(br#"{"session_id": " ", "user_id": "", "user_ids": [""]}"#)
        else {
            panic!("blank fields should decode");
        };
        assert!(env.session().is_none());
        assert!(env.is_untargeted());
    }

    #[test]
    fn wrong_shape_is_malformed() {
        assert!(Envelope::decode(b"[1,2,3]").is_err());
        assert!(Envelope::decode(b"[]").is_err());
        assert!(Envelope::decode(br#"[null,null,null,"6f1c2a8e-9d4b-4c55-8a77-0b6f3e2d1c90"]"#).is_err());
        assert!(Envelope::decode(b"\"user\"").is_err());
        assert!(Envelope::decode(br#"{"roles": [1]}"#).is_err());
        assert!(Envelope::decode(br#"{"user_ids": "not-a-list"}"#).is_err());
        assert!(Envelope::decode(b"").is_err());
    }
}
