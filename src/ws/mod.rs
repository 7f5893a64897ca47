//! WebSocket layer: upgrade, connection limits and delivery pumps.
//!
//! Clients connect at `/ws/notify/{user_id}` and receive every event
//! routed to them. The only inbound traffic is session control frames.

pub mod connection;
pub mod handler;
pub mod limits;
pub mod messages;

pub use limits::{ConnectionLimits, ConnectionPermit};
