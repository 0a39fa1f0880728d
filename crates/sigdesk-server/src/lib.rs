//! # sigdesk-server
//!
//! Axum HTTP + WebSocket server for remote signature collection.
//!
//! - [`websocket`]: device channels, the connection registry, per-connection
//!   reader/writer/heartbeat tasks, and inbound frame routing
//! - [`signing`]: the session store, the orchestrator that owns every status
//!   change, the expiry sweep, and the archive hook
//! - [`http`]: create / poll / cancel endpoints and the tablet listing
//! - [`server`]: router assembly, listener, and shutdown wiring

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod signing;
pub mod websocket;
