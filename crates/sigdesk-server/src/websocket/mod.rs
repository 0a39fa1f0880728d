//! Device WebSocket handling: channels, registry, per-connection tasks, and
//! inbound frame routing.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod session;
