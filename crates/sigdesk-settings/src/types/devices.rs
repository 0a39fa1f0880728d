//! Tablet credential records.

use serde::{Deserialize, Serialize};

/// One tablet allowed to connect, with the tenant it belongs to.
///
/// Only the SHA-256 of the device token is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredential {
    /// Tablet identity (matches the connection path).
    pub tablet_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Physical location (service bay, front desk, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// Lowercase hex SHA-256 of the device token.
    pub token_sha256: String,
}
