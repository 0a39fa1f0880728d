//! Live connection registry: at most one channel per device id.
//!
//! Both maps are `DashMap`s, so registration for one device only locks that
//! key's shard. Replacing an entry closes the superseded channel while the
//! entry is still held, so no caller can observe two live channels for the
//! same id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use parking_lot::Mutex;
use sigdesk_core::{ConnectionId, TabletId, TenantId, WorkstationId};
use sigdesk_protocol::ServerMessage;
use tracing::{debug, info, warn};

use super::connection::{CloseReason, DeviceChannel};
use crate::metrics::WS_SUPERSEDED_TOTAL;

/// A registered tablet.
pub struct TabletConnection {
    /// Device id.
    pub tablet_id: TabletId,
    /// Tenant the tablet is bound to.
    pub tenant_id: TenantId,
    /// Physical location.
    pub location_id: Option<String>,
    /// Live channel.
    pub channel: Arc<DeviceChannel>,
    last_seen_at: Mutex<DateTime<Utc>>,
}

impl TabletConnection {
    /// Build a tablet entry.
    pub fn new(
        tablet_id: TabletId,
        tenant_id: TenantId,
        location_id: Option<String>,
        channel: Arc<DeviceChannel>,
    ) -> Self {
        Self {
            tablet_id,
            tenant_id,
            location_id,
            channel,
            last_seen_at: Mutex::new(Utc::now()),
        }
    }

    /// Last inbound activity.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        *self.last_seen_at.lock()
    }

    fn touch(&self) {
        *self.last_seen_at.lock() = Utc::now();
    }
}

/// A registered workstation.
pub struct WorkstationConnection {
    /// Workstation id.
    pub workstation_id: WorkstationId,
    /// Tenant the workstation is bound to.
    pub tenant_id: TenantId,
    /// Live channel.
    pub channel: Arc<DeviceChannel>,
}

/// All live device channels.
#[derive(Default)]
pub struct ConnectionRegistry {
    tablets: DashMap<TabletId, Arc<TabletConnection>>,
    workstations: DashMap<WorkstationId, Arc<WorkstationConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tablet, replacing (and closing) any existing channel.
    pub fn register_tablet(
        &self,
        tablet_id: TabletId,
        tenant_id: TenantId,
        location_id: Option<String>,
        channel: Arc<DeviceChannel>,
    ) -> Arc<TabletConnection> {
        let conn = Arc::new(TabletConnection::new(
            tablet_id.clone(),
            tenant_id,
            location_id,
            channel,
        ));
        match self.tablets.entry(tablet_id) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(Arc::clone(&conn));
                supersede(&old.channel, "tablet", entry.key());
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::clone(&conn));
            }
        }
        conn
    }

    /// Register a workstation, replacing (and closing) any existing channel.
    pub fn register_workstation(
        &self,
        workstation_id: WorkstationId,
        tenant_id: TenantId,
        channel: Arc<DeviceChannel>,
    ) -> Arc<WorkstationConnection> {
        let conn = Arc::new(WorkstationConnection {
            workstation_id: workstation_id.clone(),
            tenant_id,
            channel,
        });
        match self.workstations.entry(workstation_id) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(Arc::clone(&conn));
                supersede(&old.channel, "workstation", entry.key());
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::clone(&conn));
            }
        }
        conn
    }

    /// Remove the tablet entry only if it still holds `connection_id`.
    pub fn unregister_tablet(&self, tablet_id: &TabletId, connection_id: &ConnectionId) -> bool {
        let removed = self
            .tablets
            .remove_if(tablet_id, |_, conn| conn.channel.id() == connection_id)
            .is_some();
        if !removed {
            debug!(%tablet_id, %connection_id, "stale tablet unregister ignored");
        }
        removed
    }

    /// Remove the workstation entry only if it still holds `connection_id`.
    pub fn unregister_workstation(
        &self,
        workstation_id: &WorkstationId,
        connection_id: &ConnectionId,
    ) -> bool {
        let removed = self
            .workstations
            .remove_if(workstation_id, |_, conn| conn.channel.id() == connection_id)
            .is_some();
        if !removed {
            debug!(%workstation_id, %connection_id, "stale workstation unregister ignored");
        }
        removed
    }

    /// Whether the tablet has an open channel.
    pub fn is_tablet_online(&self, tablet_id: &TabletId) -> bool {
        self.tablets
            .get(tablet_id)
            .is_some_and(|conn| !conn.channel.is_closed())
    }

    /// Current tablet entry.
    pub fn lookup_tablet(&self, tablet_id: &TabletId) -> Option<Arc<TabletConnection>> {
        self.tablets.get(tablet_id).map(|e| Arc::clone(e.value()))
    }

    /// Current workstation entry.
    pub fn lookup_workstation(
        &self,
        workstation_id: &WorkstationId,
    ) -> Option<Arc<WorkstationConnection>> {
        self.workstations
            .get(workstation_id)
            .map(|e| Arc::clone(e.value()))
    }

    /// Record tablet activity. Unknown ids are ignored.
    pub fn touch_last_seen(&self, tablet_id: &TabletId) {
        if let Some(conn) = self.tablets.get(tablet_id) {
            conn.touch();
        }
    }

    /// Registered tablets.
    pub fn count_tablets(&self) -> usize {
        self.tablets.len()
    }

    /// Registered workstations.
    pub fn count_workstations(&self) -> usize {
        self.workstations.len()
    }

    /// Registered devices of both kinds.
    pub fn count_total(&self) -> usize {
        self.count_tablets() + self.count_workstations()
    }

    /// Tablets of `tenant_id` with an open channel, sorted by id.
    pub fn online_tablets(&self, tenant_id: &TenantId) -> Vec<Arc<TabletConnection>> {
        let mut tablets: Vec<_> = self
            .tablets
            .iter()
            .filter(|e| e.tenant_id == *tenant_id && !e.channel.is_closed())
            .map(|e| Arc::clone(e.value()))
            .collect();
        tablets.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        tablets
    }

    /// Best-effort push to every workstation of `tenant_id`.
    ///
    /// Returns the number of channels the message was queued on.
    pub fn broadcast_to_tenant(&self, tenant_id: &TenantId, message: &ServerMessage) -> usize {
        let text = match message.to_text() {
            Ok(t) => t,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        let recipients: Vec<Arc<WorkstationConnection>> = self
            .workstations
            .iter()
            .filter(|e| e.tenant_id == *tenant_id)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut delivered = 0;
        for ws in &recipients {
            if ws.channel.send(text.clone()) {
                delivered += 1;
            } else {
                debug!(workstation_id = %ws.workstation_id, "broadcast dropped");
            }
        }
        debug!(%tenant_id, kind = message.kind(), delivered, "tenant broadcast");
        delivered
    }

    /// Close every registered channel.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let channels: Vec<Arc<DeviceChannel>> = self
            .tablets
            .iter()
            .map(|e| Arc::clone(&e.channel))
            .chain(self.workstations.iter().map(|e| Arc::clone(&e.channel)))
            .collect();
        for channel in &channels {
            let _ = channel.close(reason);
        }
        info!(count = channels.len(), reason = reason.as_str(), "closed all channels");
        channels.len()
    }
}

fn supersede(old: &DeviceChannel, kind: &'static str, device_id: &str) {
    if old.close(CloseReason::Superseded) {
        counter!(WS_SUPERSEDED_TOTAL, "kind" => kind).increment(1);
        info!(kind, device_id, connection_id = %old.id(), "superseded existing channel");
    } else {
        debug!(kind, device_id, "replaced channel was already closed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
