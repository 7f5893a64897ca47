//! # notify-hub
//!
//! Real-time notification fan-out over WebSocket.
//!
//! Clients hold one WebSocket each and are indexed by user id, session
//! membership, region and role. Upstream producers publish event
//! envelopes (over Kafka or HTTP); the hub resolves each envelope's
//! targets and forwards the original bytes to every matching client.
//! Slow clients never stall delivery to others: each has a bounded
//! outbound queue and payloads that do not fit are dropped. Several hub
//! instances can share ingress through a Redis pub/sub relay.
//!
//! ## Architecture
//!
//! ```text
//! Producers (Kafka, HTTP)          Clients (WebSocket)
//!     │                                 ▲      │ control frames
//!     ├── EventSource (source/)         │      │
//!     ├── Ingress API (api/)            │      ▼
//!     │    └─► relay ⇄ other hubs  Delivery pumps (ws/)
//!     ├── EventRouter (domain/)         ▲
//!     │                                 │ per-client bounded queues
//!     └──────► ConnectionRegistry (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod source;
pub mod ws;
