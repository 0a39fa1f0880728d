//! Machine-readable error codes.
//!
//! Used in channel `error` envelopes and in HTTP error bodies.

/// Target tablet is not connected for the tenant.
pub const TABLET_OFFLINE: &str = "TABLET_OFFLINE";
/// Session does not exist (or belongs to another tenant).
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Session deadline passed.
pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
/// Frame came from a device other than the session's tablet.
pub const DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";
/// Session already finished.
pub const SESSION_NOT_ACTIVE: &str = "SESSION_NOT_ACTIVE";
/// Requested timeout outside the accepted range.
pub const INVALID_TIMEOUT: &str = "INVALID_TIMEOUT";
/// A device involved in the request is bound to another tenant.
pub const CROSS_TENANT_DEVICE: &str = "CROSS_TENANT_DEVICE";
/// The request could not be delivered to the tablet.
pub const DISPATCH_FAILED: &str = "DISPATCH_FAILED";
/// Device credential missing or rejected.
pub const UNAUTHORIZED_DEVICE: &str = "UNAUTHORIZED_DEVICE";
/// Caller did not identify its tenant.
pub const MISSING_TENANT: &str = "MISSING_TENANT";
/// Frame was not valid JSON or not an envelope.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
/// Envelope payload did not match its type.
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
/// Envelope type is not handled on this channel.
pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
/// Request body failed validation.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
