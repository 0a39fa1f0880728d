//! The `SignatureSession` aggregate and its status state machine.
//!
//! ```text
//! PENDING ─▶ SENT_TO_TABLET ─▶ VIEWING_INVOICE ◀─▶ SIGNING_IN_PROGRESS
//!                  │                  │                    │
//!                  └──────────────────┴────────────────────┴─▶ COMPLETED
//!
//! any non-terminal ─▶ EXPIRED | CANCELLED | ERROR
//! ```
//!
//! Terminal states (`COMPLETED`, `EXPIRED`, `CANCELLED`, `ERROR`) accept no
//! further transitions.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TransitionError;
use crate::ids::{SessionId, TabletId, TenantId, WorkstationId};

/// Caller-defined key/value payload carried through a session untouched.
pub type BusinessContext = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a signature session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    /// Stored, not yet delivered to the tablet.
    Pending,
    /// Request written to the tablet channel.
    SentToTablet,
    /// Signer is reviewing the document.
    ViewingInvoice,
    /// Signer is drawing the signature.
    SigningInProgress,
    /// Signature captured.
    Completed,
    /// Deadline passed before completion.
    Expired,
    /// Cancelled by the requester.
    Cancelled,
    /// Dispatch or device failure.
    Error,
}

impl SignatureStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::SentToTablet,
        Self::ViewingInvoice,
        Self::SigningInProgress,
        Self::Completed,
        Self::Expired,
        Self::Cancelled,
        Self::Error,
    ];

    /// Whether no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Expired | Self::Cancelled | Self::Error
        )
    }

    /// Whether the tablet reports this status while the signer works.
    pub fn is_tablet_progress(self) -> bool {
        matches!(self, Self::ViewingInvoice | Self::SigningInProgress)
    }

    /// Whether `self -> next` is an edge of the state graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            Self::Expired | Self::Cancelled | Self::Error => true,
            Self::SentToTablet => self == Self::Pending,
            Self::ViewingInvoice | Self::SigningInProgress | Self::Completed => {
                matches!(
                    self,
                    Self::SentToTablet | Self::ViewingInvoice | Self::SigningInProgress
                )
            }
            Self::Pending => false,
        }
    }

    /// Wire name (`SCREAMING_SNAKE_CASE`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::SentToTablet => "SENT_TO_TABLET",
            Self::ViewingInvoice => "VIEWING_INVOICE",
            Self::SigningInProgress => "SIGNING_IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of signature being requested. Display-only; never branched on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    /// Plain signature.
    #[default]
    General,
    /// Acknowledgment of receipt of information.
    Acknowledgment,
    /// Agreement to terms.
    Agreement,
    /// Receipt of goods or vehicle.
    Receipt,
    /// Authorization of work.
    Authorization,
    /// Witness signature.
    Witness,
    /// Caller-defined meaning.
    Custom,
}

/// Everything needed to open a new session.
#[derive(Clone, Debug)]
pub struct NewSignatureSession {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target tablet.
    pub tablet_id: TabletId,
    /// Requesting workstation.
    pub workstation_id: WorkstationId,
    /// Name shown to the signer.
    pub signer_name: String,
    /// Title shown on the tablet.
    pub title: String,
    /// Free-form instructions shown on the tablet.
    pub instructions: String,
    /// Opaque caller payload.
    pub business_context: BusinessContext,
    /// Minutes until the session expires.
    pub timeout_minutes: u32,
    /// Signature category.
    pub signature_type: SignatureType,
    /// Caller correlation id.
    pub external_reference: Option<String>,
}

/// One signature-collection transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSession {
    /// Session identifier.
    pub id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target tablet.
    pub tablet_id: TabletId,
    /// Requesting workstation.
    pub workstation_id: WorkstationId,
    /// Name shown to the signer.
    pub signer_name: String,
    /// Title shown on the tablet.
    pub title: String,
    /// Instructions shown on the tablet.
    pub instructions: String,
    /// Opaque caller payload.
    pub business_context: BusinessContext,
    /// Signature category.
    pub signature_type: SignatureType,
    /// Current status.
    pub status: SignatureStatus,
    /// Every status held so far, oldest first.
    pub status_history: Vec<SignatureStatus>,
    /// Requested timeout in minutes.
    pub timeout_minutes: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute deadline.
    pub expires_at: DateTime<Utc>,
    /// Time of the last status change.
    pub updated_at: DateTime<Utc>,
    /// Signing time, set only on `COMPLETED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    /// Reference to the captured image, set only on `COMPLETED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_image_ref: Option<String>,
    /// Caller correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    /// Why the session ended without a signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SignatureSession {
    /// Open a `PENDING` session created at `now`.
    pub fn new(request: NewSignatureSession, now: DateTime<Utc>) -> Self {
        let expires_at = now + Duration::minutes(i64::from(request.timeout_minutes));
        Self {
            id: SessionId::new(),
            tenant_id: request.tenant_id,
            tablet_id: request.tablet_id,
            workstation_id: request.workstation_id,
            signer_name: request.signer_name,
            title: request.title,
            instructions: request.instructions,
            business_context: request.business_context,
            signature_type: request.signature_type,
            status: SignatureStatus::Pending,
            status_history: vec![SignatureStatus::Pending],
            timeout_minutes: request.timeout_minutes,
            created_at: now,
            expires_at,
            updated_at: now,
            signed_at: None,
            signature_image_ref: None,
            external_reference: request.external_reference,
            failure_reason: None,
        }
    }

    /// Whether the session reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `now` is at or past the deadline.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move to `next` if the graph allows it.
    pub fn transition(
        &mut self,
        next: SignatureStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.status_history.push(next);
        self.updated_at = at;
        Ok(())
    }

    /// Record a captured signature and move to `COMPLETED`.
    pub fn complete(
        &mut self,
        image_ref: String,
        signed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(SignatureStatus::Completed, at)?;
        self.signed_at = Some(signed_at);
        self.signature_image_ref = Some(image_ref);
        Ok(())
    }

    /// End the session without a signature (`EXPIRED`, `CANCELLED`, `ERROR`).
    pub fn fail(
        &mut self,
        status: SignatureStatus,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        debug_assert!(status.is_terminal() && status != SignatureStatus::Completed);
        self.transition(status, at)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn request() -> NewSignatureSession {
        let mut ctx = BusinessContext::new();
        let _ = ctx.insert("invoiceId".into(), json!("INV-1042"));
        NewSignatureSession {
            tenant_id: "acme".into(),
            tablet_id: "tab-1".into(),
            workstation_id: "ws-1".into(),
            signer_name: "Jordan Lee".into(),
            title: "Repair authorization".into(),
            instructions: "Sign below".into(),
            business_context: ctx,
            timeout_minutes: 10,
            signature_type: SignatureType::Authorization,
            external_reference: Some("RO-77".into()),
        }
    }

    #[test]
    fn new_session_is_pending_with_deadline() {
        let s = SignatureSession::new(request(), t0());
        assert_eq!(s.status, SignatureStatus::Pending);
        assert_eq!(s.status_history, vec![SignatureStatus::Pending]);
        assert_eq!(s.expires_at, t0() + Duration::minutes(10));
        assert!(s.signed_at.is_none());
        assert!(!s.is_terminal());
    }

    #[test]
    fn happy_path_records_history() {
        let mut s = SignatureSession::new(request(), t0());
        s.transition(SignatureStatus::SentToTablet, t0()).unwrap();
        s.transition(SignatureStatus::ViewingInvoice, t0()).unwrap();
        s.transition(SignatureStatus::SigningInProgress, t0()).unwrap();
        s.complete("blob://sig/1".into(), t0(), t0()).unwrap();
        assert_eq!(
            s.status_history,
            vec![
                SignatureStatus::Pending,
                SignatureStatus::SentToTablet,
                SignatureStatus::ViewingInvoice,
                SignatureStatus::SigningInProgress,
                SignatureStatus::Completed,
            ]
        );
        assert_eq!(s.signature_image_ref.as_deref(), Some("blob://sig/1"));
        assert_eq!(s.signed_at, Some(t0()));
    }

    #[test]
    fn completion_directly_from_sent() {
        let mut s = SignatureSession::new(request(), t0());
        s.transition(SignatureStatus::SentToTablet, t0()).unwrap();
        assert!(s.complete("img".into(), t0(), t0()).is_ok());
    }

    #[test]
    fn pending_cannot_complete() {
        let mut s = SignatureSession::new(request(), t0());
        let err = s.complete("img".into(), t0(), t0()).unwrap_err();
        assert_eq!(err.from, SignatureStatus::Pending);
        assert!(s.signature_image_ref.is_none());
    }

    #[test]
    fn terminal_is_final() {
        let mut s = SignatureSession::new(request(), t0());
        s.fail(SignatureStatus::Expired, "deadline passed", t0()).unwrap();
        for next in SignatureStatus::ALL {
            assert_matches!(s.transition(next, t0()), Err(TransitionError { .. }));
        }
        assert_eq!(s.status, SignatureStatus::Expired);
        assert_eq!(s.failure_reason.as_deref(), Some("deadline passed"));
    }

    #[test]
    fn failure_states_reachable_from_every_non_terminal() {
        for from in SignatureStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            for to in [
                SignatureStatus::Expired,
                SignatureStatus::Cancelled,
                SignatureStatus::Error,
            ] {
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn deadline_check_is_inclusive() {
        let s = SignatureSession::new(request(), t0());
        assert!(!s.is_past_deadline(t0() + Duration::minutes(9)));
        assert!(s.is_past_deadline(t0() + Duration::minutes(10)));
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_value(SignatureStatus::SentToTablet).unwrap(),
            json!("SENT_TO_TABLET")
        );
        assert_eq!(
            serde_json::to_value(SignatureType::Acknowledgment).unwrap(),
            json!("ACKNOWLEDGMENT")
        );
        for status in SignatureStatus::ALL {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }

    #[test]
    fn session_serializes_camel_case() {
        let s = SignatureSession::new(request(), t0());
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["tabletId"], "tab-1");
        assert_eq!(v["businessContext"]["invoiceId"], "INV-1042");
        assert_eq!(v["status"], "PENDING");
        assert!(v.get("signedAt").is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = SignatureStatus> {
            (0..SignatureStatus::ALL.len()).prop_map(|i| SignatureStatus::ALL[i])
        }

        proptest! {
            #[test]
            fn history_is_always_a_legal_path(steps in proptest::collection::vec(any_status(), 0..24)) {
                let mut s = SignatureSession::new(request(), t0());
                for next in steps {
                    let before = s.status;
                    let applied = s.transition(next, t0()).is_ok();
                    prop_assert_eq!(applied, before.can_transition_to(next));
                }
                for pair in s.status_history.windows(2) {
                    prop_assert!(pair[0].can_transition_to(pair[1]));
                }
                let terminal_at = s.status_history.iter().position(|st| st.is_terminal());
                if let Some(idx) = terminal_at {
                    prop_assert_eq!(idx, s.status_history.len() - 1);
                }
            }
        }
    }
}
