//! Inbound frame routing.
//!
//! Every text frame is parsed as an envelope and dispatched by type. Frames
//! that cannot be handled get an `error` reply; the connection stays open.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sigdesk_protocol::messages::ErrorPayload;
use sigdesk_protocol::{ProtocolError, ServerMessage, TabletFrame, WorkstationFrame};
use tracing::{debug, warn};

use super::connection::DeviceChannel;
use super::registry::{TabletConnection, WorkstationConnection};
use crate::metrics::WS_UNKNOWN_FRAMES_TOTAL;
use crate::signing::{SessionOrchestrator, SigningError};

/// Dispatches device frames to the orchestrator.
#[derive(Clone)]
pub struct MessageRouter {
    orchestrator: Arc<SessionOrchestrator>,
}

impl MessageRouter {
    /// Route into `orchestrator`.
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one text frame from a tablet.
    pub fn handle_tablet_text(&self, conn: &TabletConnection, text: &str) {
        self.orchestrator
            .registry()
            .touch_last_seen(&conn.tablet_id);

        let frame = match TabletFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                reply_protocol_error(&conn.channel, &e);
                return;
            }
        };

        match frame {
            TabletFrame::Heartbeat => {
                let _ = conn
                    .channel
                    .send_message(&ServerMessage::heartbeat_ack(Utc::now()));
            }
            TabletFrame::Progress(progress) => {
                if let Err(e) = self.orchestrator.handle_tablet_progress(
                    &progress.session_id,
                    &conn.tablet_id,
                    progress.status,
                ) {
                    debug!(
                        tablet_id = %conn.tablet_id,
                        session_id = %progress.session_id,
                        code = e.code(),
                        "progress ignored"
                    );
                }
            }
            TabletFrame::Completed(completed) => {
                if let Err(e) = self.orchestrator.handle_signature_submission(
                    &completed.session_id,
                    &conn.tablet_id,
                    completed.image_ref,
                    completed.signed_at,
                ) {
                    reply_signing_error(&conn.channel, &e);
                }
            }
            TabletFrame::Error(report) => {
                if let Err(e) = self.orchestrator.handle_tablet_error(
                    report.session_id.as_ref(),
                    &conn.tablet_id,
                    &report.message,
                ) {
                    debug!(tablet_id = %conn.tablet_id, code = e.code(), "tablet error report ignored");
                }
            }
        }
    }

    /// Handle one text frame from a workstation.
    pub fn handle_workstation_text(&self, conn: &WorkstationConnection, text: &str) {
        match WorkstationFrame::parse(text) {
            Ok(WorkstationFrame::Heartbeat) => {
                let _ = conn
                    .channel
                    .send_message(&ServerMessage::heartbeat_ack(Utc::now()));
            }
            Err(e) => reply_protocol_error(&conn.channel, &e),
        }
    }
}

fn reply_protocol_error(channel: &DeviceChannel, err: &ProtocolError) {
    if matches!(err, ProtocolError::UnknownType(_)) {
        counter!(WS_UNKNOWN_FRAMES_TOTAL, "kind" => channel.role().as_str()).increment(1);
    }
    warn!(
        connection_id = %channel.id(),
        role = channel.role().as_str(),
        code = err.code(),
        error = %err,
        "rejected inbound frame"
    );
    let _ = channel.send_message(&ServerMessage::error(err.code(), err.to_string()));
}

fn reply_signing_error(channel: &DeviceChannel, err: &SigningError) {
    let _ = channel.send_message(&ServerMessage::Error(ErrorPayload {
        message: err.to_string(),
        code: err.code().to_owned(),
        session_id: err.session_id().cloned(),
    }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use sigdesk_core::{SignatureSession, SignatureStatus, SystemClock};
    use sigdesk_protocol::api::CreateSignatureRequest;
    use sigdesk_protocol::messages::DeviceRole;
    use tokio::sync::mpsc;

    use crate::signing::{LoggingArchive, SessionStore, TimeoutPolicy};
    use crate::websocket::connection::OutboundFrame;
    use crate::websocket::registry::ConnectionRegistry;

    fn device(role: DeviceRole) -> (Arc<DeviceChannel>, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, mut rx) = mpsc::channel::<OutboundFrame>(32);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Some(ack) = frame.ack {
                    let _ = ack.send(());
                }
                let _ = out_tx.send(serde_json::from_str(&frame.text).unwrap());
            }
        });
        (Arc::new(DeviceChannel::new(role, tx)), out_rx)
    }

    struct Fixture {
        router: MessageRouter,
        orch: Arc<SessionOrchestrator>,
        tablet: Arc<TabletConnection>,
        tablet_rx: mpsc::UnboundedReceiver<serde_json::Value>,
        workstation: Arc<WorkstationConnection>,
        workstation_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(SessionStore::new(
            Arc::new(SystemClock),
            Duration::from_secs(900),
        ));
        let orch = Arc::new(SessionOrchestrator::new(
            store,
            Arc::clone(&registry),
            Arc::new(LoggingArchive),
            TimeoutPolicy::default(),
            Duration::from_secs(1),
        ));
        let (tch, tablet_rx) = device(DeviceRole::Tablet);
        let tablet = registry.register_tablet("tab-1".into(), "acme".into(), None, tch);
        let (wch, workstation_rx) = device(DeviceRole::Workstation);
        let workstation = registry.register_workstation("ws-1".into(), "acme".into(), wch);
        Fixture {
            router: MessageRouter::new(Arc::clone(&orch)),
            orch,
            tablet,
            tablet_rx,
            workstation,
            workstation_rx,
        }
    }

    async fn open_session(f: &mut Fixture) -> SignatureSession {
        let session = f
            .orch
            .create_session(
                &"acme".into(),
                CreateSignatureRequest {
                    tablet_id: "tab-1".into(),
                    workstation_id: "ws-1".into(),
                    signer_name: "A".into(),
                    title: "B".into(),
                    instructions: String::new(),
                    business_context: serde_json::Map::new(),
                    timeout_minutes: None,
                    signature_type: sigdesk_core::SignatureType::General,
                    external_reference: None,
                },
            )
            .await
            .unwrap();
        let request = f.tablet_rx.recv().await.unwrap();
        assert_eq!(request["type"], "signature_request");
        session
    }

    #[tokio::test]
    async fn tablet_heartbeat_gets_ack() {
        let mut f = fixture();
        f.router
            .handle_tablet_text(&f.tablet, r#"{"type":"heartbeat","payload":{}}"#);
        let reply = f.tablet_rx.recv().await.unwrap();
        assert_eq!(reply["type"], "heartbeat_ack");
        assert!(reply["payload"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_type_gets_error_envelope() {
        let mut f = fixture();
        f.router
            .handle_tablet_text(&f.tablet, r#"{"type":"dance","payload":{}}"#);
        let reply = f.tablet_rx.recv().await.unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["payload"]["code"], "UNKNOWN_MESSAGE_TYPE");
        assert!(!f.tablet.channel.is_closed());
    }

    #[tokio::test]
    async fn malformed_json_gets_error_envelope() {
        let mut f = fixture();
        f.router.handle_tablet_text(&f.tablet, "{not json");
        let reply = f.tablet_rx.recv().await.unwrap();
        assert_eq!(reply["payload"]["code"], "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn invalid_payload_gets_error_envelope() {
        let mut f = fixture();
        f.router.handle_tablet_text(
            &f.tablet,
            r#"{"type":"signature_completed","payload":{"sessionId":"s-1"}}"#,
        );
        let reply = f.tablet_rx.recv().await.unwrap();
        assert_eq!(reply["payload"]["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn progress_and_completion_reach_workstation() {
        let mut f = fixture();
        let session = open_session(&mut f).await;

        let progress = json!({
            "type": "signature_progress",
            "payload": {"sessionId": session.id, "status": "SIGNING_IN_PROGRESS"}
        });
        f.router.handle_tablet_text(&f.tablet, &progress.to_string());
        let update = f.workstation_rx.recv().await.unwrap();
        assert_eq!(update["type"], "signature_status");
        assert_eq!(update["payload"]["status"], "SIGNING_IN_PROGRESS");

        let completed = json!({
            "type": "signature_completed",
            "payload": {"sessionId": session.id, "imageRef": "blob://sig/9"}
        });
        f.router.handle_tablet_text(&f.tablet, &completed.to_string());
        let done = f.workstation_rx.recv().await.unwrap();
        assert_eq!(done["payload"]["status"], "COMPLETED");
        assert_eq!(done["payload"]["success"], true);
        assert_eq!(
            f.orch
                .session_status(&session.id, &"acme".into())
                .unwrap()
                .status,
            SignatureStatus::Completed
        );
    }

    #[tokio::test]
    async fn rejected_completion_is_reported_to_tablet() {
        let mut f = fixture();
        let completed = json!({
            "type": "signature_completed",
            "payload": {"sessionId": "missing", "imageRef": "img"}
        });
        f.router.handle_tablet_text(&f.tablet, &completed.to_string());
        let reply = f.tablet_rx.recv().await.unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["payload"]["code"], "SESSION_NOT_FOUND");
        assert_eq!(reply["payload"]["sessionId"], "missing");
    }

    #[tokio::test]
    async fn tablet_error_report_fails_session() {
        let mut f = fixture();
        let session = open_session(&mut f).await;
        let report = json!({
            "type": "error",
            "payload": {"sessionId": session.id, "message": "stylus lost"}
        });
        f.router.handle_tablet_text(&f.tablet, &report.to_string());
        let update = f.workstation_rx.recv().await.unwrap();
        assert_eq!(update["payload"]["status"], "ERROR");
        assert_eq!(update["payload"]["success"], false);
    }

    #[tokio::test]
    async fn workstation_heartbeat_and_unknown() {
        let mut f = fixture();
        f.router
            .handle_workstation_text(&f.workstation, r#"{"type":"heartbeat"}"#);
        assert_eq!(f.workstation_rx.recv().await.unwrap()["type"], "heartbeat_ack");

        f.router.handle_workstation_text(
            &f.workstation,
            r#"{"type":"signature_completed","payload":{}}"#,
        );
        let reply = f.workstation_rx.recv().await.unwrap();
        assert_eq!(reply["payload"]["code"], "UNKNOWN_MESSAGE_TYPE");
    }
}
