//! Signing operation errors.

use sigdesk_core::{SessionId, SignatureStatus, TabletId};
use sigdesk_protocol::codes;
use thiserror::Error;

use crate::websocket::connection::DeliveryError;

/// Why a signing operation was rejected.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The tablet has no open channel for the caller's tenant.
    #[error("tablet {tablet_id} is not online")]
    TabletOffline {
        /// Requested tablet.
        tablet_id: TabletId,
    },

    /// No active or recently finished session with this id.
    #[error("signature session {session_id} not found")]
    SessionNotFound {
        /// Requested session.
        session_id: SessionId,
    },

    /// The session expired, or its deadline has passed.
    #[error("signature session {session_id} has expired")]
    SessionExpired {
        /// Affected session.
        session_id: SessionId,
    },

    /// The frame came from a tablet other than the session's.
    #[error("signature session {session_id} belongs to tablet {expected}, not {actual}")]
    DeviceMismatch {
        /// Affected session.
        session_id: SessionId,
        /// Tablet the session was dispatched to.
        expected: TabletId,
        /// Tablet that sent the frame.
        actual: TabletId,
    },

    /// The session already finished with a non-expired status.
    #[error("signature session {session_id} is no longer active ({status})")]
    SessionNotActive {
        /// Affected session.
        session_id: SessionId,
        /// Its terminal status.
        status: SignatureStatus,
    },

    /// Requested timeout is outside the accepted range.
    #[error("timeout of {requested} minutes is outside {min}..={max}")]
    InvalidTimeout {
        /// Requested minutes.
        requested: u32,
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },

    /// A referenced device is registered under another tenant.
    #[error("device {device_id} belongs to another tenant")]
    CrossTenantDevice {
        /// Offending device.
        device_id: String,
    },

    /// The request could not be written to the tablet.
    #[error("signature session {session_id} could not be dispatched: {source}")]
    DispatchFailed {
        /// Session, now in `ERROR`.
        session_id: SessionId,
        /// Channel failure.
        #[source]
        source: DeliveryError,
    },
}

impl SigningError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TabletOffline { .. } => codes::TABLET_OFFLINE,
            Self::SessionNotFound { .. } => codes::SESSION_NOT_FOUND,
            Self::SessionExpired { .. } => codes::SESSION_EXPIRED,
            Self::DeviceMismatch { .. } => codes::DEVICE_MISMATCH,
            Self::SessionNotActive { .. } => codes::SESSION_NOT_ACTIVE,
            Self::InvalidTimeout { .. } => codes::INVALID_TIMEOUT,
            Self::CrossTenantDevice { .. } => codes::CROSS_TENANT_DEVICE,
            Self::DispatchFailed { .. } => codes::DISPATCH_FAILED,
        }
    }

    /// Session the error refers to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionNotFound { session_id }
            | Self::SessionExpired { session_id }
            | Self::DeviceMismatch { session_id, .. }
            | Self::SessionNotActive { session_id, .. }
            | Self::DispatchFailed { session_id, .. } => Some(session_id),
            Self::TabletOffline { .. }
            | Self::InvalidTimeout { .. }
            | Self::CrossTenantDevice { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn codes_match_wire_constants() {
        let id = SessionId::from("s-1");
        let cases: Vec<(SigningError, &str)> = vec![
            (
                SigningError::TabletOffline {
                    tablet_id: "tab-1".into(),
                },
                "TABLET_OFFLINE",
            ),
            (
                SigningError::SessionNotFound {
                    session_id: id.clone(),
                },
                "SESSION_NOT_FOUND",
            ),
            (
                SigningError::SessionExpired {
                    session_id: id.clone(),
                },
                "SESSION_EXPIRED",
            ),
            (
                SigningError::DeviceMismatch {
                    session_id: id.clone(),
                    expected: "tab-1".into(),
                    actual: "tab-2".into(),
                },
                "DEVICE_MISMATCH",
            ),
            (
                SigningError::SessionNotActive {
                    session_id: id.clone(),
                    status: SignatureStatus::Cancelled,
                },
                "SESSION_NOT_ACTIVE",
            ),
            (
                SigningError::InvalidTimeout {
                    requested: 0,
                    min: 1,
                    max: 60,
                },
                "INVALID_TIMEOUT",
            ),
            (
                SigningError::CrossTenantDevice {
                    device_id: "ws-9".into(),
                },
                "CROSS_TENANT_DEVICE",
            ),
            (
                SigningError::DispatchFailed {
                    session_id: id,
                    source: DeliveryError::Closed,
                },
                "DISPATCH_FAILED",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn dispatch_failure_keeps_source() {
        let err = SigningError::DispatchFailed {
            session_id: "s-1".into(),
            source: DeliveryError::Timeout(Duration::from_secs(5)),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("not confirmed"));
        assert_eq!(err.session_id().map(SessionId::as_str), Some("s-1"));
    }

    #[test]
    fn display_names_devices() {
        let err = SigningError::DeviceMismatch {
            session_id: "s-1".into(),
            expected: "tab-1".into(),
            actual: "tab-2".into(),
        };
        assert_eq!(
            err.to_string(),
            "signature session s-1 belongs to tablet tab-1, not tab-2"
        );
    }
}
