//! Client attributes supplied at connection time.

use std::collections::BTreeSet;

/// Routing attributes attached to a connection at registration.
///
/// Immutable for the lifetime of the connection. Values are normalized
/// on construction: surrounding whitespace is trimmed and empty values
/// are discarded, so an empty region never reaches the region index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    region: Option<String>,
    roles: BTreeSet<String>,
}

impl ClientMetadata {
    /// Builds metadata from a region and an iterator of role names.
    #[must_use]
    pub fn new<I, S>(region: Option<&str>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let region = region
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned);
        let roles = roles
            .into_iter()
            .filter_map(|r| {
                let r = r.as_ref().trim();
                (!r.is_empty()).then(|| r.to_owned())
            })
            .collect();
        Self { region, roles }
    }

    /// Builds metadata from connection parameters: a single region and a
    /// comma-separated role list (e.g. `?region=eu-west&roles=operator,premium`).
    #[must_use]
    pub fn from_params(region: Option<&str>, roles: Option<&str>) -> Self {
        Self::new(region, roles.unwrap_or_default().split(','))
    }

    /// The client's region, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// The client's role set.
    #[must_use]
    pub const fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns `true` if the client holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
