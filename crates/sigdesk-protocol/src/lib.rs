//! # sigdesk-protocol
//!
//! Everything that crosses the wire:
//!
//! - [`envelope`]: the `{"type", "payload"}` frame and inbound frame parsing
//! - [`messages`]: server-pushed messages for tablets and workstations
//! - [`api`]: HTTP request/response bodies
//! - [`codes`]: machine-readable error codes shared by all surfaces

#![deny(unsafe_code)]

pub mod api;
pub mod codes;
pub mod envelope;
pub mod messages;

pub use envelope::{Envelope, ProtocolError, TabletFrame, WorkstationFrame};
pub use messages::ServerMessage;
