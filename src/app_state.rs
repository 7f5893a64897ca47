//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::{ConnectionRegistry, EventRouter};
use crate::source::Ingress;
use crate::ws::ConnectionLimits;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live client directory.
    pub registry: Arc<ConnectionRegistry>,
    /// Where ingress envelopes go: the local router or the relay.
    pub ingress: Ingress,
    /// WebSocket admission limits.
    pub limits: Arc<ConnectionLimits>,
}

impl AppState {
    /// Builds state around `registry`, routing ingress locally.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, limits: Arc<ConnectionLimits>) -> Self {
        Self {
            ingress: Ingress::local(EventRouter::new(Arc::clone(&registry))),
            registry,
            limits,
        }
    }

    /// Replaces the ingress, typically with a relayed one.
    #[must_use]
    pub fn with_ingress(mut self, ingress: Ingress) -> Self {
        self.ingress = ingress;
        self
    }
}
