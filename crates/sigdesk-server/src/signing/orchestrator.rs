//! Session orchestration.
//!
//! [`SessionOrchestrator`] is the only component that changes a session's
//! status. Every change happens under the session's slot lock; the task that
//! moves a session into a terminal status is the only one that retires it,
//! records its metrics, pushes the final notifications, and archives it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sigdesk_core::{
    NewSignatureSession, SessionId, SignatureSession, SignatureStatus, TabletId, TenantId,
};
use sigdesk_protocol::ServerMessage;
use sigdesk_protocol::api::CreateSignatureRequest;
use sigdesk_protocol::messages::{
    SessionClosedPayload, SignatureRequestPayload, SignatureStatusPayload,
};
use tracing::{debug, info, instrument, warn};

use super::archive::SessionArchive;
use super::error::SigningError;
use super::store::{SessionSlot, SessionStore};
use crate::metrics::{
    DISPATCH_FAILURES_TOTAL, LATE_EVENTS_TOTAL, REJECTIONS_TOTAL, SESSION_DURATION_SECONDS,
    SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL, SESSIONS_FINISHED_TOTAL,
};
use crate::websocket::registry::{ConnectionRegistry, WorkstationConnection};

/// Accepted session timeouts, in minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Used when the request names none.
    pub default_minutes: u32,
    /// Inclusive lower bound.
    pub min_minutes: u32,
    /// Inclusive upper bound.
    pub max_minutes: u32,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default_minutes: 10,
            min_minutes: 1,
            max_minutes: 60,
        }
    }
}

impl TimeoutPolicy {
    /// Resolve the requested timeout against the bounds.
    pub fn resolve(&self, requested: Option<u32>) -> Result<u32, SigningError> {
        let minutes = requested.unwrap_or(self.default_minutes);
        if (self.min_minutes..=self.max_minutes).contains(&minutes) {
            Ok(minutes)
        } else {
            Err(SigningError::InvalidTimeout {
                requested: minutes,
                min: self.min_minutes,
                max: self.max_minutes,
            })
        }
    }
}

/// Drives every signature session from creation to a terminal status.
pub struct SessionOrchestrator {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    archive: Arc<dyn SessionArchive>,
    policy: TimeoutPolicy,
    write_timeout: Duration,
}

impl SessionOrchestrator {
    /// Create an orchestrator over `store` and `registry`.
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ConnectionRegistry>,
        archive: Arc<dyn SessionArchive>,
        policy: TimeoutPolicy,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            archive,
            policy,
            write_timeout,
        }
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Open a session and deliver it to the tablet.
    ///
    /// Nothing is stored unless the tablet is online for `tenant_id`. Once
    /// stored, a failed delivery leaves the session in `ERROR` and returns
    /// [`SigningError::DispatchFailed`].
    #[instrument(skip_all, fields(tenant_id = %tenant_id, tablet_id = %request.tablet_id))]
    pub async fn create_session(
        &self,
        tenant_id: &TenantId,
        request: CreateSignatureRequest,
    ) -> Result<SignatureSession, SigningError> {
        let timeout_minutes = self
            .policy
            .resolve(request.timeout_minutes)
            .map_err(|e| self.reject(e))?;

        let Some(tablet) = self
            .registry
            .lookup_tablet(&request.tablet_id)
            .filter(|t| t.tenant_id == *tenant_id && !t.channel.is_closed())
        else {
            return Err(self.reject(SigningError::TabletOffline {
                tablet_id: request.tablet_id,
            }));
        };

        let foreign_workstation = self
            .registry
            .lookup_workstation(&request.workstation_id)
            .is_some_and(|ws| ws.tenant_id != *tenant_id);
        if foreign_workstation {
            return Err(self.reject(SigningError::CrossTenantDevice {
                device_id: request.workstation_id.into_inner(),
            }));
        }

        let session = SignatureSession::new(
            NewSignatureSession {
                tenant_id: tenant_id.clone(),
                tablet_id: request.tablet_id,
                workstation_id: request.workstation_id,
                signer_name: request.signer_name,
                title: request.title,
                instructions: request.instructions,
                business_context: request.business_context,
                timeout_minutes,
                signature_type: request.signature_type,
                external_reference: request.external_reference,
            },
            self.store.now(),
        );
        let session_id = session.id.clone();
        let message = ServerMessage::SignatureRequest(SignatureRequestPayload::from(&session));
        let slot = self.store.insert(session);
        counter!(SESSIONS_CREATED_TOTAL).increment(1);
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        info!(%session_id, timeout_minutes, "signature session created");

        match tablet.channel.send_confirmed(&message, self.write_timeout).await {
            Ok(()) => {
                let snapshot = {
                    let mut session = slot.lock();
                    if session.status == SignatureStatus::Pending {
                        let now = self.store.now();
                        if let Err(e) = session.transition(SignatureStatus::SentToTablet, now) {
                            warn!(%session_id, error = %e, "failed to record dispatch");
                        }
                    } else {
                        debug!(%session_id, status = %session.status, "dispatch ack after status change");
                    }
                    session.clone()
                };
                Ok(snapshot)
            }
            Err(source) => {
                counter!(DISPATCH_FAILURES_TOTAL).increment(1);
                warn!(%session_id, error = %source, "signature request dispatch failed");
                let reason = format!("dispatch failed: {source}");
                if let Some(snapshot) = self.end(&slot, SignatureStatus::Error, reason) {
                    self.finalize(snapshot);
                }
                Err(self.reject(SigningError::DispatchFailed { session_id, source }))
            }
        }
    }

    /// Apply a `VIEWING_INVOICE` / `SIGNING_IN_PROGRESS` report from a tablet.
    #[instrument(skip_all, fields(session_id = %session_id, tablet_id = %device))]
    pub fn handle_tablet_progress(
        &self,
        session_id: &SessionId,
        device: &TabletId,
        status: SignatureStatus,
    ) -> Result<SignatureSession, SigningError> {
        let Some(slot) = self.store.slot(session_id) else {
            return Err(self.reject_missing(session_id, device));
        };
        let snapshot = {
            let mut session = slot.lock();
            if session.tablet_id != *device {
                return Err(self.reject(mismatch(&session, device)));
            }
            if session.is_terminal() {
                return Err(self.reject_late(&session));
            }
            if session.status == status {
                debug!(%status, "duplicate progress ignored");
                return Ok(session.clone());
            }
            if self.store.is_past_deadline(&session) {
                return Err(self.reject(SigningError::SessionExpired {
                    session_id: session_id.clone(),
                }));
            }
            let now = self.store.now();
            if session.status == SignatureStatus::Pending {
                session
                    .transition(SignatureStatus::SentToTablet, now)
                    .map_err(|_| self.reject(not_active(&session)))?;
            }
            session
                .transition(status, now)
                .map_err(|_| self.reject(not_active(&session)))?;
            session.clone()
        };
        debug!(status = %snapshot.status, "signature progress recorded");
        self.notify_workstation(&snapshot);
        Ok(snapshot)
    }

    /// Complete a session with the tablet's captured signature.
    ///
    /// Rejected without any state change when the session is unknown, owned
    /// by another tablet, finished, or past its deadline.
    #[instrument(skip_all, fields(session_id = %session_id, tablet_id = %device))]
    pub fn handle_signature_submission(
        &self,
        session_id: &SessionId,
        device: &TabletId,
        image_ref: String,
        signed_at: Option<DateTime<Utc>>,
    ) -> Result<SignatureSession, SigningError> {
        let Some(slot) = self.store.slot(session_id) else {
            return Err(self.reject_missing(session_id, device));
        };
        let snapshot = {
            let mut session = slot.lock();
            if session.tablet_id != *device {
                return Err(self.reject(mismatch(&session, device)));
            }
            if session.is_terminal() {
                return Err(self.reject_late(&session));
            }
            if self.store.is_past_deadline(&session) {
                return Err(self.reject(SigningError::SessionExpired {
                    session_id: session_id.clone(),
                }));
            }
            let now = self.store.now();
            if session.status == SignatureStatus::Pending {
                session
                    .transition(SignatureStatus::SentToTablet, now)
                    .map_err(|_| self.reject(not_active(&session)))?;
            }
            session
                .complete(image_ref, signed_at.unwrap_or(now), now)
                .map_err(|_| self.reject(not_active(&session)))?;
            session.clone()
        };
        self.finalize(snapshot.clone());
        Ok(snapshot)
    }

    /// Withdraw a session. Cancelling a finished session returns it unchanged.
    #[instrument(skip_all, fields(session_id = %session_id, tenant_id = %tenant_id))]
    pub fn cancel_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        reason: Option<String>,
    ) -> Result<SignatureSession, SigningError> {
        let not_found = || SigningError::SessionNotFound {
            session_id: session_id.clone(),
        };
        let Some(slot) = self.store.slot(session_id) else {
            return match self.store.retired(session_id) {
                Some(session) if session.tenant_id == *tenant_id => Ok(session),
                _ => Err(self.reject(not_found())),
            };
        };
        let owner = slot.lock().tenant_id.clone();
        if owner != *tenant_id {
            return Err(self.reject(not_found()));
        }
        let reason = reason.unwrap_or_else(|| "cancelled by requester".to_owned());
        match self.end(&slot, SignatureStatus::Cancelled, reason) {
            Some(snapshot) => {
                self.finalize(snapshot.clone());
                Ok(snapshot)
            }
            None => Ok(slot.snapshot()),
        }
    }

    /// Record a failure reported by a tablet.
    ///
    /// Reports without a session id, or for a session the tablet does not
    /// own, change nothing.
    #[instrument(skip_all, fields(tablet_id = %device))]
    pub fn handle_tablet_error(
        &self,
        session_id: Option<&SessionId>,
        device: &TabletId,
        message: &str,
    ) -> Result<Option<SignatureSession>, SigningError> {
        let Some(session_id) = session_id else {
            warn!(message, "tablet reported an error");
            return Ok(None);
        };
        let Some(slot) = self.store.slot(session_id) else {
            return Err(self.reject_missing(session_id, device));
        };
        {
            let session = slot.lock();
            if session.tablet_id != *device {
                return Err(self.reject(mismatch(&session, device)));
            }
        }
        warn!(%session_id, message, "tablet reported a session error");
        match self.end(&slot, SignatureStatus::Error, format!("tablet error: {message}")) {
            Some(snapshot) => {
                self.finalize(snapshot.clone());
                Ok(Some(snapshot))
            }
            None => Err(self.reject_late(&slot.snapshot())),
        }
    }

    /// Expire every overdue session, then prune old retained sessions.
    ///
    /// Returns the number of sessions this call expired.
    pub fn expire_overdue(&self) -> usize {
        let mut expired = 0;
        for slot in self.store.overdue() {
            let snapshot = {
                let mut session = slot.lock();
                if session.is_terminal() || !self.store.is_past_deadline(&session) {
                    continue;
                }
                let now = self.store.now();
                match session.fail(SignatureStatus::Expired, "deadline passed", now) {
                    Ok(()) => session.clone(),
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "failed to expire session");
                        continue;
                    }
                }
            };
            info!(session_id = %snapshot.id, "signature session expired");
            self.finalize(snapshot);
            expired += 1;
        }
        let pruned = self.store.prune_retired();
        if expired > 0 || pruned > 0 {
            debug!(expired, pruned, "expiry sweep");
        }
        expired
    }

    /// Tenant-scoped read of an active or retained session.
    pub fn session_status(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<SignatureSession, SigningError> {
        self.store
            .get(session_id)
            .filter(|s| s.tenant_id == *tenant_id)
            .ok_or_else(|| SigningError::SessionNotFound {
                session_id: session_id.clone(),
            })
    }

    /// Push the current status of every non-terminal session a workstation
    /// requested. Returns how many were queued.
    pub fn resync_workstation(&self, connection: &WorkstationConnection) -> usize {
        let sessions = self
            .store
            .active_for_workstation(&connection.tenant_id, &connection.workstation_id);
        let sent = sessions
            .iter()
            .filter(|s| {
                connection
                    .channel
                    .send_message(&ServerMessage::SignatureStatus(SignatureStatusPayload::from(*s)))
            })
            .count();
        debug!(
            workstation_id = %connection.workstation_id,
            pending = sessions.len(),
            sent,
            "workstation resync"
        );
        sent
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Move a non-terminal session to a failure status. `None` if it had
    /// already finished.
    fn end(
        &self,
        slot: &SessionSlot,
        status: SignatureStatus,
        reason: String,
    ) -> Option<SignatureSession> {
        let mut session = slot.lock();
        if session.is_terminal() {
            return None;
        }
        let now = self.store.now();
        match session.fail(status, reason, now) {
            Ok(()) => Some(session.clone()),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to end session");
                None
            }
        }
    }

    /// Run by the winner of a terminal transition, outside the slot lock.
    fn finalize(&self, session: SignatureSession) {
        self.store.retire(session.clone());

        let status = session.status.as_str();
        counter!(SESSIONS_FINISHED_TOTAL, "status" => status).increment(1);
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
        if let Ok(elapsed) = (session.updated_at - session.created_at).to_std() {
            histogram!(SESSION_DURATION_SECONDS, "status" => status).record(elapsed.as_secs_f64());
        }

        self.notify_workstation(&session);
        let closed = SessionClosedPayload {
            session_id: session.id.clone(),
            reason: session.failure_reason.clone(),
        };
        match session.status {
            SignatureStatus::Cancelled => {
                self.notify_tablet(&session, &ServerMessage::SignatureCancelled(closed));
            }
            SignatureStatus::Expired => {
                self.notify_tablet(&session, &ServerMessage::SignatureExpired(closed));
            }
            _ => {}
        }

        if let Err(e) = self.archive.archive(&session) {
            warn!(session_id = %session.id, error = %e, "session archive failed");
        }
        info!(session_id = %session.id, status, "signature session finished");
    }

    fn notify_workstation(&self, session: &SignatureSession) {
        let delivered = self
            .registry
            .lookup_workstation(&session.workstation_id)
            .filter(|ws| ws.tenant_id == session.tenant_id)
            .is_some_and(|ws| {
                ws.channel
                    .send_message(&ServerMessage::SignatureStatus(SignatureStatusPayload::from(
                        session,
                    )))
            });
        if !delivered {
            debug!(
                session_id = %session.id,
                workstation_id = %session.workstation_id,
                "workstation notification not delivered"
            );
        }
    }

    fn notify_tablet(&self, session: &SignatureSession, message: &ServerMessage) {
        let delivered = self
            .registry
            .lookup_tablet(&session.tablet_id)
            .filter(|t| t.tenant_id == session.tenant_id)
            .is_some_and(|t| t.channel.send_message(message));
        if !delivered {
            debug!(
                session_id = %session.id,
                tablet_id = %session.tablet_id,
                kind = message.kind(),
                "tablet notification not delivered"
            );
        }
    }

    fn reject(&self, err: SigningError) -> SigningError {
        counter!(REJECTIONS_TOTAL, "code" => err.code()).increment(1);
        debug!(code = err.code(), error = %err, "signing operation rejected");
        err
    }

    /// A frame arrived for a session that already finished.
    fn reject_late(&self, session: &SignatureSession) -> SigningError {
        counter!(LATE_EVENTS_TOTAL).increment(1);
        info!(session_id = %session.id, status = %session.status, "late event for finished session");
        self.reject(not_active(session))
    }

    /// The session is not in the active table: answer from the retained
    /// snapshot when there is one.
    fn reject_missing(&self, session_id: &SessionId, device: &TabletId) -> SigningError {
        match self.store.retired(session_id) {
            Some(session) if session.tablet_id != *device => {
                self.reject(mismatch(&session, device))
            }
            Some(session) => self.reject_late(&session),
            None => self.reject(SigningError::SessionNotFound {
                session_id: session_id.clone(),
            }),
        }
    }
}

fn mismatch(session: &SignatureSession, device: &TabletId) -> SigningError {
    SigningError::DeviceMismatch {
        session_id: session.id.clone(),
        expected: session.tablet_id.clone(),
        actual: device.clone(),
    }
}

/// Error for a session that can no longer move: `EXPIRED` maps to
/// `SessionExpired`, everything else to `SessionNotActive`.
fn not_active(session: &SignatureSession) -> SigningError {
    if session.status == SignatureStatus::Expired {
        SigningError::SessionExpired {
            session_id: session.id.clone(),
        }
    } else {
        SigningError::SessionNotActive {
            session_id: session.id.clone(),
            status: session.status,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
