//! In-memory session store.
//!
//! Active sessions live in a `DashMap` of slots, each slot guarding its
//! session with its own mutex. A slot lock is never held across an `.await`
//! and never held while writing to either map. Sessions that reach a
//! terminal status move to the retired table, where they stay readable until
//! the retention elapses.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use sigdesk_core::{Clock, SessionId, SignatureSession, TenantId, WorkstationId};
use tracing::debug;

/// One active session and its lock.
#[derive(Debug)]
pub struct SessionSlot {
    session: Mutex<SignatureSession>,
}

impl SessionSlot {
    fn new(session: SignatureSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Lock the session for a read-modify-write.
    pub fn lock(&self) -> MutexGuard<'_, SignatureSession> {
        self.session.lock()
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> SignatureSession {
        self.session.lock().clone()
    }
}

#[derive(Debug)]
struct Retired {
    session: SignatureSession,
    retired_at: DateTime<Utc>,
}

/// Active and recently finished sessions.
pub struct SessionStore {
    active: DashMap<SessionId, Arc<SessionSlot>>,
    retired: DashMap<SessionId, Retired>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl SessionStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>, retention: std::time::Duration) -> Self {
        Self {
            active: DashMap::new(),
            retired: DashMap::new(),
            clock,
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(365)),
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether `session` is at or past its deadline.
    pub fn is_past_deadline(&self, session: &SignatureSession) -> bool {
        session.is_past_deadline(self.now())
    }

    /// Add a new active session.
    pub fn insert(&self, session: SignatureSession) -> Arc<SessionSlot> {
        let id = session.id.clone();
        let slot = Arc::new(SessionSlot::new(session));
        let _ = self.active.insert(id, Arc::clone(&slot));
        slot
    }

    /// Slot of an active session.
    pub fn slot(&self, id: &SessionId) -> Option<Arc<SessionSlot>> {
        self.active.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of an active or retained session.
    pub fn get(&self, id: &SessionId) -> Option<SignatureSession> {
        if let Some(slot) = self.slot(id) {
            return Some(slot.snapshot());
        }
        self.retired(id)
    }

    /// Snapshot of a retained terminal session.
    pub fn retired(&self, id: &SessionId) -> Option<SignatureSession> {
        self.retired.get(id).map(|e| e.session.clone())
    }

    /// Move a terminal snapshot out of the active table.
    ///
    /// The retired entry is written first so the session is readable at every
    /// point.
    pub fn retire(&self, session: SignatureSession) {
        debug_assert!(session.is_terminal());
        let id = session.id.clone();
        let _ = self.retired.insert(
            id.clone(),
            Retired {
                session,
                retired_at: self.now(),
            },
        );
        let _ = self.active.remove(&id);
        debug!(session_id = %id, "session retired");
    }

    /// Active sessions at or past their deadline.
    pub fn overdue(&self) -> Vec<Arc<SessionSlot>> {
        let now = self.now();
        let slots: Vec<Arc<SessionSlot>> =
            self.active.iter().map(|e| Arc::clone(e.value())).collect();
        slots
            .into_iter()
            .filter(|slot| {
                let session = slot.lock();
                !session.is_terminal() && session.is_past_deadline(now)
            })
            .collect()
    }

    /// Drop retained sessions older than the retention. Returns how many.
    pub fn prune_retired(&self) -> usize {
        let Some(cutoff) = self.now().checked_sub_signed(self.retention) else {
            return 0;
        };
        let before = self.retired.len();
        self.retired.retain(|_, r| r.retired_at > cutoff);
        before.saturating_sub(self.retired.len())
    }

    /// Non-terminal sessions requested by one workstation, oldest first.
    pub fn active_for_workstation(
        &self,
        tenant_id: &TenantId,
        workstation_id: &WorkstationId,
    ) -> Vec<SignatureSession> {
        let slots: Vec<Arc<SessionSlot>> =
            self.active.iter().map(|e| Arc::clone(e.value())).collect();
        let mut sessions: Vec<SignatureSession> = slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|s| {
                !s.is_terminal()
                    && s.tenant_id == *tenant_id
                    && s.workstation_id == *workstation_id
            })
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Sessions in the active table.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Sessions in the retired table.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sigdesk_core::{
        BusinessContext, ManualClock, NewSignatureSession, SignatureStatus, SignatureType,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = SessionStore::new(clock.clone(), std::time::Duration::from_secs(900));
        (store, clock)
    }

    fn session(workstation: &str, minutes: u32, now: DateTime<Utc>) -> SignatureSession {
        SignatureSession::new(
            NewSignatureSession {
                tenant_id: "acme".into(),
                tablet_id: "tab-1".into(),
                workstation_id: workstation.into(),
                signer_name: "A".into(),
                title: "B".into(),
                instructions: String::new(),
                business_context: BusinessContext::new(),
                timeout_minutes: minutes,
                signature_type: SignatureType::General,
                external_reference: None,
            },
            now,
        )
    }

    #[test]
    fn insert_and_get() {
        let (store, _) = store();
        let s = session("ws-1", 10, t0());
        let id = s.id.clone();
        let _ = store.insert(s);
        assert_eq!(store.get(&id).unwrap().status, SignatureStatus::Pending);
        assert_eq!(store.active_count(), 1);
        assert!(store.get(&SessionId::from("missing")).is_none());
    }

    #[test]
    fn retire_moves_to_retired_table() {
        let (store, _) = store();
        let s = session("ws-1", 10, t0());
        let id = s.id.clone();
        let slot = store.insert(s);
        let snapshot = {
            let mut guard = slot.lock();
            guard.fail(SignatureStatus::Cancelled, "withdrawn", t0()).unwrap();
            guard.clone()
        };
        store.retire(snapshot);

        assert!(store.slot(&id).is_none());
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.retired(&id).unwrap().status, SignatureStatus::Cancelled);
        assert_eq!(store.get(&id).unwrap().status, SignatureStatus::Cancelled);
    }

    #[test]
    fn deadline_uses_store_clock() {
        let (store, clock) = store();
        let s = session("ws-1", 10, t0());
        assert!(!store.is_past_deadline(&s));
        clock.advance(Duration::minutes(10));
        assert!(store.is_past_deadline(&s));
    }

    #[test]
    fn overdue_lists_only_expired_non_terminal() {
        let (store, clock) = store();
        let short = session("ws-1", 1, t0());
        let short_id = short.id.clone();
        let _ = store.insert(short);
        let _ = store.insert(session("ws-1", 30, t0()));
        let done = store.insert(session("ws-1", 1, t0()));
        done.lock()
            .fail(SignatureStatus::Error, "tablet failure", t0())
            .unwrap();

        clock.advance(Duration::minutes(2));
        let overdue = store.overdue();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].snapshot().id, short_id);
    }

    #[test]
    fn prune_respects_retention() {
        let (store, clock) = store();
        let slot = store.insert(session("ws-1", 10, t0()));
        let snapshot = {
            let mut guard = slot.lock();
            guard.fail(SignatureStatus::Expired, "deadline passed", t0()).unwrap();
            guard.clone()
        };
        store.retire(snapshot);

        clock.advance(Duration::minutes(14));
        assert_eq!(store.prune_retired(), 0);
        assert_eq!(store.retired_count(), 1);

        clock.advance(Duration::minutes(2));
        assert_eq!(store.prune_retired(), 1);
        assert_eq!(store.retired_count(), 0);
    }

    #[test]
    fn active_for_workstation_filters_and_orders() {
        let (store, clock) = store();
        let first = session("ws-1", 10, t0());
        let first_id = first.id.clone();
        let _ = store.insert(first);
        clock.advance(Duration::seconds(5));
        let second = session("ws-1", 10, clock.now());
        let second_id = second.id.clone();
        let _ = store.insert(second);
        let _ = store.insert(session("ws-2", 10, clock.now()));

        let listed: Vec<SessionId> = store
            .active_for_workstation(&"acme".into(), &"ws-1".into())
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(listed, vec![first_id, second_id]);
        assert!(
            store
                .active_for_workstation(&"globex".into(), &"ws-1".into())
                .is_empty()
        );
    }
}
