//! Signature session lifecycle.
//!
//! - [`store`]: active sessions behind per-session locks, plus retained
//!   terminal snapshots
//! - [`orchestrator`]: every status change, notification, and archive call
//! - [`expiry`]: the periodic sweep that expires overdue sessions
//! - [`archive`]: the hook that receives finished sessions

pub mod archive;
pub mod error;
pub mod expiry;
pub mod orchestrator;
pub mod store;

pub use archive::{ArchiveError, LoggingArchive, SessionArchive};
pub use error::SigningError;
pub use expiry::ExpiryScheduler;
pub use orchestrator::{SessionOrchestrator, TimeoutPolicy};
pub use store::{SessionSlot, SessionStore};
