//! Server-pushed messages.
//!
//! Serialized as the same `{"type", "payload"}` envelope the devices send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigdesk_core::{
    BusinessContext, SessionId, SignatureSession, SignatureStatus, SignatureType, TabletId,
    TenantId,
};

/// Which side of the exchange a channel serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Signature capture device.
    Tablet,
    /// Back-office requester.
    Workstation,
}

impl DeviceRole {
    /// Lowercase name, used as a metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tablet => "tablet",
            Self::Workstation => "workstation",
        }
    }
}

/// Every message the server writes to a device channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the channel is registered.
    Connected(ConnectedPayload),
    /// Tablet: show this request to the signer.
    SignatureRequest(SignatureRequestPayload),
    /// Tablet: the request was withdrawn.
    SignatureCancelled(SessionClosedPayload),
    /// Tablet: the request ran out of time.
    SignatureExpired(SessionClosedPayload),
    /// Workstation: a session changed status.
    SignatureStatus(SignatureStatusPayload),
    /// Workstation: a tablet of the tenant came or went.
    TabletStatus(TabletStatusPayload),
    /// Reply to `heartbeat`.
    HeartbeatAck(HeartbeatAckPayload),
    /// Something the device sent could not be processed.
    Error(ErrorPayload),
}

impl ServerMessage {
    /// The envelope `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::SignatureRequest(_) => "signature_request",
            Self::SignatureCancelled(_) => "signature_cancelled",
            Self::SignatureExpired(_) => "signature_expired",
            Self::SignatureStatus(_) => "signature_status",
            Self::TabletStatus(_) => "tablet_status",
            Self::HeartbeatAck(_) => "heartbeat_ack",
            Self::Error(_) => "error",
        }
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Build an `error` message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.to_owned(),
            message: message.into(),
            session_id: None,
        })
    }

    /// Build a `heartbeat_ack` stamped `now`.
    pub fn heartbeat_ack(now: DateTime<Utc>) -> Self {
        Self::HeartbeatAck(HeartbeatAckPayload { timestamp: now })
    }
}

/// `connected` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Channel role.
    pub role: DeviceRole,
    /// Tablet or workstation id.
    pub device_id: String,
    /// Tenant the channel is bound to.
    pub tenant_id: TenantId,
    /// Server-assigned connection id.
    pub connection_id: String,
    /// Server time at registration.
    pub server_time: DateTime<Utc>,
    /// Expected heartbeat cadence.
    pub heartbeat_interval_secs: u64,
}

/// `signature_request` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequestPayload {
    /// Session id the tablet must echo back.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Name shown to the signer.
    pub signer_name: String,
    /// Title.
    pub title: String,
    /// Instructions.
    pub instructions: String,
    /// Opaque caller payload.
    pub business_context: BusinessContext,
    /// Requested timeout.
    pub timeout_minutes: u32,
    /// Absolute deadline.
    pub expires_at: DateTime<Utc>,
    /// Signature category.
    pub signature_type: SignatureType,
    /// Caller correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

impl From<&SignatureSession> for SignatureRequestPayload {
    fn from(session: &SignatureSession) -> Self {
        Self {
            session_id: session.id.clone(),
            tenant_id: session.tenant_id.clone(),
            signer_name: session.signer_name.clone(),
            title: session.title.clone(),
            instructions: session.instructions.clone(),
            business_context: session.business_context.clone(),
            timeout_minutes: session.timeout_minutes,
            expires_at: session.expires_at,
            signature_type: session.signature_type,
            external_reference: session.external_reference.clone(),
        }
    }
}

/// `signature_cancelled` / `signature_expired` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosedPayload {
    /// Session that ended.
    pub session_id: SessionId,
    /// Human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `signature_status` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatusPayload {
    /// Session id.
    pub session_id: SessionId,
    /// New status.
    pub status: SignatureStatus,
    /// Present only for terminal statuses; `true` only for `COMPLETED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Signing time when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    /// Image reference when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_image_ref: Option<String>,
    /// Caller correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    /// Failure reason for `EXPIRED` / `CANCELLED` / `ERROR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&SignatureSession> for SignatureStatusPayload {
    fn from(session: &SignatureSession) -> Self {
        let terminal = session.is_terminal();
        Self {
            session_id: session.id.clone(),
            status: session.status,
            success: terminal.then_some(session.status == SignatureStatus::Completed),
            signed_at: session.signed_at,
            signature_image_ref: session.signature_image_ref.clone(),
            external_reference: session.external_reference.clone(),
            reason: session.failure_reason.clone(),
        }
    }
}

/// `tablet_status` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletStatusPayload {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Where the tablet is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// Whether it is now connected.
    pub online: bool,
}

/// `heartbeat_ack` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
    /// Server time.
    pub timestamp: DateTime<Utc>,
}

/// `error` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code (see [`crate::codes`]).
    pub code: String,
    /// Session the error relates to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use chrono::TimeZone;
    use serde_json::json;
    use sigdesk_core::NewSignatureSession;

    fn session() -> SignatureSession {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        SignatureSession::new(
            NewSignatureSession {
                tenant_id: "acme".into(),
                tablet_id: "tab-1".into(),
                workstation_id: "ws-1".into(),
                signer_name: "Jordan Lee".into(),
                title: "Estimate".into(),
                instructions: String::new(),
                business_context: BusinessContext::new(),
                timeout_minutes: 5,
                signature_type: SignatureType::Agreement,
                external_reference: None,
            },
            now,
        )
    }

    #[test]
    fn envelope_shape() {
        let msg = ServerMessage::error(codes::UNKNOWN_MESSAGE_TYPE, "nope");
        let v: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"type": "error", "payload": {"message": "nope", "code": "UNKNOWN_MESSAGE_TYPE"}})
        );
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let s = session();
        let msgs = vec![
            ServerMessage::SignatureRequest((&s).into()),
            ServerMessage::SignatureStatus((&s).into()),
            ServerMessage::SignatureExpired(SessionClosedPayload {
                session_id: s.id.clone(),
                reason: None,
            }),
            ServerMessage::heartbeat_ack(s.created_at),
            ServerMessage::TabletStatus(TabletStatusPayload {
                tablet_id: "tab-1".into(),
                location_id: None,
                online: true,
            }),
        ];
        for msg in msgs {
            let v = serde_json::to_value(&msg).unwrap();
            assert_eq!(v["type"], msg.kind());
        }
    }

    #[test]
    fn signature_request_carries_session_fields() {
        let s = session();
        let v = serde_json::to_value(ServerMessage::SignatureRequest((&s).into())).unwrap();
        let p = &v["payload"];
        assert_eq!(p["sessionId"], s.id.as_str());
        assert_eq!(p["signerName"], "Jordan Lee");
        assert_eq!(p["timeoutMinutes"], 5);
        assert_eq!(p["signatureType"], "AGREEMENT");
        assert!(p.get("externalReference").is_none());
    }

    #[test]
    fn status_success_only_on_terminal() {
        let mut s = session();
        let open = SignatureStatusPayload::from(&s);
        assert!(open.success.is_none());

        s.transition(SignatureStatus::SentToTablet, s.created_at).unwrap();
        s.complete("blob://1".into(), s.created_at, s.created_at).unwrap();
        let done = SignatureStatusPayload::from(&s);
        assert_eq!(done.success, Some(true));
        assert_eq!(done.signature_image_ref.as_deref(), Some("blob://1"));

        let mut e = session();
        e.fail(SignatureStatus::Expired, "timed out", e.created_at).unwrap();
        let expired = SignatureStatusPayload::from(&e);
        assert_eq!(expired.success, Some(false));
        assert_eq!(expired.reason.as_deref(), Some("timed out"));
    }

    #[test]
    fn client_can_decode_server_messages() {
        let text = r#"{"type":"tablet_status","payload":{"tabletId":"tab-9","online":false}}"#;
        let msg: ServerMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            ServerMessage::TabletStatus(TabletStatusPayload {
                tablet_id: "tab-9".into(),
                location_id: None,
                online: false,
            })
        );
    }
}
