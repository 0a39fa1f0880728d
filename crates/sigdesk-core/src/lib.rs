//! # sigdesk-core
//!
//! Foundation types shared by every sigdesk crate:
//!
//! - **Branded IDs**: `SessionId`, `TenantId`, `TabletId`, `WorkstationId`,
//!   `ConnectionId` as newtypes so a tablet id can never be passed where a
//!   workstation id is expected
//! - **Signature sessions**: the `SignatureSession` aggregate and the
//!   `SignatureStatus` state machine
//! - **Clock**: wall-clock abstraction so deadlines can be tested
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::TransitionError;
pub use ids::{ConnectionId, SessionId, TabletId, TenantId, WorkstationId};
pub use session::{
    BusinessContext, NewSignatureSession, SignatureSession, SignatureStatus, SignatureType,
};
