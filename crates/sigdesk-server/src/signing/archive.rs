//! Hand-off point for finished sessions.

use sigdesk_core::SignatureSession;
use thiserror::Error;
use tracing::info;

/// Failure reported by an archive implementation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The snapshot was not stored.
    #[error("archive failed: {0}")]
    Failed(String),
}

/// Receives every session once, when it reaches a terminal status.
///
/// Called from the task that won the terminal transition, outside any session
/// lock. Errors are logged by the caller and never affect the session.
pub trait SessionArchive: Send + Sync {
    /// Persist a terminal snapshot.
    fn archive(&self, session: &SignatureSession) -> Result<(), ArchiveError>;
}

/// Default archive: writes a structured log line per session.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingArchive;

impl SessionArchive for LoggingArchive {
    fn archive(&self, session: &SignatureSession) -> Result<(), ArchiveError> {
        info!(
            session_id = %session.id,
            tenant_id = %session.tenant_id,
            tablet_id = %session.tablet_id,
            status = %session.status,
            external_reference = session.external_reference.as_deref().unwrap_or(""),
            "signature session archived"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sigdesk_core::{BusinessContext, NewSignatureSession, SignatureType};

    #[test]
    fn logging_archive_accepts_snapshot() {
        let session = SignatureSession::new(
            NewSignatureSession {
                tenant_id: "acme".into(),
                tablet_id: "tab-1".into(),
                workstation_id: "ws-1".into(),
                signer_name: "A".into(),
                title: "B".into(),
                instructions: String::new(),
                business_context: BusinessContext::new(),
                timeout_minutes: 5,
                signature_type: SignatureType::General,
                external_reference: None,
            },
            Utc::now(),
        );
        assert!(LoggingArchive.archive(&session).is_ok());
    }
}
