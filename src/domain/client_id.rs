//! Type-safe client identifier.
//!
//! [`ClientId`] is a newtype wrapper around [`uuid::Uuid`] naming a
//! connected principal. The hub never generates these for real clients:
//! the caller supplies one at registration time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque 128-bit identifier of a connected client.
///
/// Used as the key of the registry directory and as the member value
/// stored in every session, region and role index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Creates a random `ClientId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `ClientId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses after trimming surrounding whitespace.
impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<uuid::Uuid> for ClientId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ClientId> for uuid::Uuid {
    fn from(id: ClientId) -> Self {
        id.0
    }
}
