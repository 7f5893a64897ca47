//! Event router: turns an envelope into registry broadcast calls.
//!
//! Each populated targeting field is handled on its own, so one envelope
//! can produce up to four broadcasts. A client matched by two different
//! fields receives the event twice; only duplicates inside a single
//! region or role list are collapsed (by the registry).

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;

use super::registry::DeliveryReport;
use super::{ClientId, ConnectionRegistry, Envelope, SessionId};
use crate::error::HubError;

/// What a single routed envelope produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RouteReport {
    /// Broadcast calls issued (0 to 4).
    pub broadcasts: usize,
    /// Identifiers skipped because they failed to parse.
    pub skipped_ids: usize,
    /// Combined enqueue tally across all broadcasts.
    pub delivery: DeliveryReport,
}

/// Resolves envelopes against the shared [`ConnectionRegistry`].
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
}

impl EventRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Decodes `raw` as an [`Envelope`] and dispatches it, forwarding `raw`
    /// verbatim to every target.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MalformedEnvelope`] if `raw` does not decode.
    pub async fn route(&self, raw: Bytes) -> Result<RouteReport, HubError> {
        let envelope = Envelope::decode(&raw)?;
        Ok(self.dispatch(&envelope, raw).await)
    }

    /// Issues one broadcast per populated field of `envelope`, delivering
    /// `payload` as-is.
    pub async fn dispatch(&self, envelope: &Envelope, payload: Bytes) -> RouteReport {
        let mut report = RouteReport::default();

        if let Some(session_id) = envelope
            .session()
            .and_then(|raw| parse_id::<SessionId>(raw, &mut report))
        {
            let delivery = self
                .registry
                .broadcast_to_session(session_id, payload.clone())
                .await;
            report.add(delivery);
        }

        let direct: Vec<ClientId> = envelope
            .direct_recipients()
            .filter_map(|raw| parse_id(raw, &mut report))
            .collect();
        if !direct.is_empty() {
            let delivery = self
                .registry
                .broadcast_to_users(&direct, payload.clone())
                .await;
            report.add(delivery);
        }

        if !envelope.regions().is_empty() {
            let delivery = self
                .registry
                .broadcast_to_regions(envelope.regions(), payload.clone())
                .await;
            report.add(delivery);
        }

        if !envelope.roles().is_empty() {
            let delivery = self
                .registry
                .broadcast_to_roles(envelope.roles(), payload)
                .await;
            report.add(delivery);
        }

        tracing::debug!(
            event = envelope.event.as_deref().unwrap_or_default(),
            broadcasts = report.broadcasts,
            enqueued = report.delivery.enqueued,
            dropped = report.delivery.dropped,
            skipped_ids = report.skipped_ids,
            "envelope routed"
        );
        report
    }
}

impl RouteReport {
    fn add(&mut self, delivery: DeliveryReport) {
        self.broadcasts += 1;
        self.delivery.merge(delivery);
    }
}

fn parse_id<T: FromStr>(raw: &str, report: &mut RouteReport) -> Option<T> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::debug!(id = raw, "skipping malformed identifier");
            report.skipped_ids += 1;
            None
        }
    }
}
