//! Domain layer: identifiers, client metadata, envelopes, the connection
//! registry and the event router.
//!
//! The registry is the only shared mutable state in the hub. Everything
//! else (HTTP handlers, WebSocket pumps, the event source loop) holds an
//! `Arc<ConnectionRegistry>` and goes through its operations.

pub mod client_id;
pub mod envelope;
pub mod metadata;
pub mod registry;
pub mod router;
pub mod session_id;

pub use client_id::ClientId;
pub use envelope::Envelope;
pub use metadata::ClientMetadata;
pub use registry::{
    ClientConnection, ConnectionId, ConnectionRegistry, DeliveryReport, RegistryStats, SendOutcome,
};
pub use router::{EventRouter, RouteReport};
pub use session_id::SessionId;
