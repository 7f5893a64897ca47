//! Cross-instance relay for ingress envelopes.
//!
//! With a relay configured, envelopes accepted by this instance (HTTP or
//! Kafka) are not routed locally. They are published once to the relay
//! channel, and every hub instance, this one included, routes them from
//! its relay subscription. Without a relay, ingress routes in place.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::SourceError;
use crate::domain::{Envelope, EventRouter, RouteReport};
use crate::error::HubError;

/// Pub/sub channel carrying relayed envelopes.
pub const RELAY_CHANNEL: &str = "psds:notification";

/// Publishes envelopes to every hub instance.
#[async_trait]
pub trait EventRelay: Send + Sync + Debug {
    /// Publishes `envelope` unchanged.
    async fn publish(&self, envelope: Bytes) -> Result<(), SourceError>;
}

/// In-process relay feeding a [`ChannelEventSource`](super::ChannelEventSource).
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelRelay {
    /// Relays into `tx`.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventRelay for ChannelRelay {
    async fn publish(&self, envelope: Bytes) -> Result<(), SourceError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SourceError::Connection("relay subscriber is gone".to_string()))
    }
}

/// What happened to a submitted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Routed on this instance.
    Routed(RouteReport),
    /// Published to the relay for every instance to route.
    Relayed,
}

/// Entry point for envelopes arriving from outside the hub.
#[derive(Debug, Clone)]
pub struct Ingress {
    router: EventRouter,
    relay: Option<Arc<dyn EventRelay>>,
}

impl Ingress {
    /// Routes every envelope on this instance.
    #[must_use]
    pub const fn local(router: EventRouter) -> Self {
        Self {
            router,
            relay: None,
        }
    }

    /// Publishes every envelope to `relay`.
    #[must_use]
    pub const fn relayed(router: EventRouter, relay: Arc<dyn EventRelay>) -> Self {
        Self {
            router,
            relay: Some(relay),
        }
    }

    /// The local router.
    #[must_use]
    pub const fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Returns `true` when envelopes go through the relay.
    #[must_use]
    pub const fn is_relayed(&self) -> bool {
        self.relay.is_some()
    }

    /// Routes or relays `raw`.
    ///
    /// The envelope is decoded first in both modes, so malformed input is
    /// never published.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MalformedEnvelope`] if `raw` does not decode,
    /// or [`HubError::RelayUnavailable`] if publishing fails.
    pub async fn submit(&self, raw: Bytes) -> Result<Submitted, HubError> {
        let Some(relay) = &self.relay else {
            return Ok(Submitted::Routed(self.router.route(raw).await?));
        };
        Envelope::decode(&raw)?;
        relay
            .publish(raw)
            .await
            .map_err(|err| HubError::RelayUnavailable(err.to_string()))?;
        Ok(Submitted::Relayed)
    }
}
