//! Core error types.

use thiserror::Error;

use crate::session::SignatureStatus;

/// A status change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal signature status transition {from} -> {to}")]
pub struct TransitionError {
    /// Status the session was in.
    pub from: SignatureStatus,
    /// Status that was requested.
    pub to: SignatureStatus,
}

impl TransitionError {
    /// Whether the rejection happened because the session already finished.
    pub fn is_terminal(&self) -> bool {
        self.from.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_both_states() {
        let err = TransitionError {
            from: SignatureStatus::Completed,
            to: SignatureStatus::Expired,
        };
        assert_eq!(
            err.to_string(),
            "illegal signature status transition COMPLETED -> EXPIRED"
        );
        assert!(err.is_terminal());
    }

    #[test]
    fn non_terminal_rejection() {
        let err = TransitionError {
            from: SignatureStatus::Pending,
            to: SignatureStatus::Completed,
        };
        assert!(!err.is_terminal());
    }
}
