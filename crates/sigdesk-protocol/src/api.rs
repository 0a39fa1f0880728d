//! HTTP request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigdesk_core::{
    BusinessContext, SessionId, SignatureSession, SignatureStatus, SignatureType, TabletId,
    TenantId, WorkstationId,
};

/// `POST /api/signatures` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureRequest {
    /// Tablet that should show the request.
    pub tablet_id: TabletId,
    /// Workstation to notify.
    pub workstation_id: WorkstationId,
    /// Signer display name.
    pub signer_name: String,
    /// Title shown on the tablet.
    pub title: String,
    /// Instructions shown on the tablet.
    #[serde(default)]
    pub instructions: String,
    /// Opaque caller payload.
    #[serde(default)]
    pub business_context: BusinessContext,
    /// Minutes until expiry; server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    /// Signature category.
    #[serde(default)]
    pub signature_type: SignatureType,
    /// Caller correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

/// `201` body for a created session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureResponse {
    /// New session id.
    pub session_id: SessionId,
    /// Status after dispatch (`SENT_TO_TABLET`).
    pub status: SignatureStatus,
    /// Absolute deadline.
    pub expires_at: DateTime<Utc>,
}

/// `POST /api/signatures/{id}/cancel` body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSignatureRequest {
    /// Why the requester withdrew.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Poll view of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatusView {
    /// Session id.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target tablet.
    pub tablet_id: TabletId,
    /// Requesting workstation.
    pub workstation_id: WorkstationId,
    /// Current status.
    pub status: SignatureStatus,
    /// Every status held, oldest first.
    pub status_history: Vec<SignatureStatus>,
    /// Signature category.
    pub signature_type: SignatureType,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Deadline.
    pub expires_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Set when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    /// Set when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_image_ref: Option<String>,
    /// Caller correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    /// Why the session ended without a signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&SignatureSession> for SignatureStatusView {
    fn from(s: &SignatureSession) -> Self {
        Self {
            session_id: s.id.clone(),
            tenant_id: s.tenant_id.clone(),
            tablet_id: s.tablet_id.clone(),
            workstation_id: s.workstation_id.clone(),
            status: s.status,
            status_history: s.status_history.clone(),
            signature_type: s.signature_type,
            created_at: s.created_at,
            expires_at: s.expires_at,
            updated_at: s.updated_at,
            signed_at: s.signed_at,
            signature_image_ref: s.signature_image_ref.clone(),
            external_reference: s.external_reference.clone(),
            failure_reason: s.failure_reason.clone(),
        }
    }
}

/// One connected tablet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineTablet {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// When the current channel was registered.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_seen_at: DateTime<Utc>,
}

/// `GET /api/tablets` body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletListResponse {
    /// Connected tablets of the tenant, sorted by id.
    pub tablets: Vec<OnlineTablet>,
}

/// Error body returned with every non-2xx status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (see [`crate::codes`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
