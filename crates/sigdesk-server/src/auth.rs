//! Tablet authentication, checked before the WebSocket upgrade.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sigdesk_core::{TabletId, TenantId};
use sigdesk_settings::DeviceCredential;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

/// A tablet whose credentials checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Tablet id.
    pub tablet_id: TabletId,
    /// Tenant the tablet belongs to.
    pub tenant_id: TenantId,
    /// Physical location.
    pub location_id: Option<String>,
}

/// Why a tablet was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `X-Device-Token` header.
    #[error("missing device token")]
    MissingToken,
    /// Unknown tablet or wrong token.
    #[error("tablet {0} is not authorized")]
    UnauthorizedDevice(TabletId),
}

/// Resolves a tablet's identity from its connection credentials.
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    /// Check `token` for `tablet_id`.
    async fn authenticate(
        &self,
        tablet_id: &TabletId,
        token: Option<&str>,
    ) -> Result<DeviceIdentity, AuthError>;
}

struct Registered {
    tenant_id: TenantId,
    location_id: Option<String>,
    token_sha256: String,
}

/// Authenticator backed by the `devices` list from settings.
pub struct StaticDeviceAuthenticator {
    devices: HashMap<TabletId, Registered>,
}

impl StaticDeviceAuthenticator {
    /// Index `credentials` by tablet id. Later duplicates win.
    pub fn new(credentials: &[DeviceCredential]) -> Self {
        let devices = credentials
            .iter()
            .map(|c| {
                (
                    TabletId::from(c.tablet_id.as_str()),
                    Registered {
                        tenant_id: TenantId::from(c.tenant_id.as_str()),
                        location_id: c.location_id.clone(),
                        token_sha256: c.token_sha256.to_ascii_lowercase(),
                    },
                )
            })
            .collect();
        Self { devices }
    }

    /// Number of registered tablets.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no tablet can connect.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceAuthenticator for StaticDeviceAuthenticator {
    async fn authenticate(
        &self,
        tablet_id: &TabletId,
        token: Option<&str>,
    ) -> Result<DeviceIdentity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let Some(device) = self.devices.get(tablet_id) else {
            warn!(%tablet_id, "connection from unregistered tablet");
            return Err(AuthError::UnauthorizedDevice(tablet_id.clone()));
        };
        if !digest_eq(&hash_token(token), &device.token_sha256) {
            warn!(%tablet_id, "tablet token mismatch");
            return Err(AuthError::UnauthorizedDevice(tablet_id.clone()));
        }
        debug!(%tablet_id, tenant_id = %device.tenant_id, "tablet authenticated");
        Ok(DeviceIdentity {
            tablet_id: tablet_id.clone(),
            tenant_id: device.tenant_id.clone(),
            location_id: device.location_id.clone(),
        })
    }
}

/// Lowercase hex SHA-256 of a device token, as stored in settings.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn digest_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
