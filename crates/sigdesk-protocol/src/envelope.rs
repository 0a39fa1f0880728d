//! The `{"type": ..., "payload": ...}` frame and inbound parsing.
//!
//! Inbound frames are parsed in two steps: first into a raw [`Envelope`] so a
//! bad payload can still be attributed to its type, then into the typed frame
//! for the channel it arrived on.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigdesk_core::{SessionId, SignatureStatus};

use crate::codes;

/// Raw wire frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type (`snake_case`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload (absent payload reads as `null`).
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Why an inbound frame could not be understood.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or JSON without a string `type`.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Payload does not match the declared type.
    #[error("invalid payload for '{kind}': {message}")]
    InvalidPayload {
        /// Declared message type.
        kind: String,
        /// Decoder message.
        message: String,
    },
    /// Type not handled on this channel.
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

impl ProtocolError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => codes::INVALID_MESSAGE,
            Self::InvalidPayload { .. } => codes::INVALID_PAYLOAD,
            Self::UnknownType(_) => codes::UNKNOWN_MESSAGE_TYPE,
        }
    }
}

// ── Tablet → server ─────────────────────────────────────────────────

/// `signature_progress` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProgress {
    /// Session being worked on.
    pub session_id: SessionId,
    /// `VIEWING_INVOICE` or `SIGNING_IN_PROGRESS`.
    pub status: SignatureStatus,
}

/// `signature_completed` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCompleted {
    /// Session the signature belongs to.
    pub session_id: SessionId,
    /// Reference to the stored signature image.
    pub image_ref: String,
    /// Device-side signing time; server time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

/// Tablet-side `error` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletErrorReport {
    /// Session the failure relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Device description of the failure.
    pub message: String,
}

/// A frame received on a tablet channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TabletFrame {
    /// Keep-alive.
    Heartbeat,
    /// Signer moved between viewing and signing.
    Progress(SignatureProgress),
    /// Signature captured.
    Completed(SignatureCompleted),
    /// Device-side failure.
    Error(TabletErrorReport),
}

impl TabletFrame {
    /// Parse a text frame from a tablet.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let Envelope { kind, payload } = Envelope::parse(text)?;
        match kind.as_str() {
            "heartbeat" => Ok(Self::Heartbeat),
            "signature_progress" => {
                let progress: SignatureProgress = decode(&kind, payload)?;
                if !progress.status.is_tablet_progress() {
                    return Err(ProtocolError::InvalidPayload {
                        kind,
                        message: format!("status {} is not a progress status", progress.status),
                    });
                }
                Ok(Self::Progress(progress))
            }
            "signature_completed" => {
                let completed: SignatureCompleted = decode(&kind, payload)?;
                if completed.image_ref.trim().is_empty() {
                    return Err(ProtocolError::InvalidPayload {
                        kind,
                        message: "imageRef must not be empty".into(),
                    });
                }
                Ok(Self::Completed(completed))
            }
            "error" => Ok(Self::Error(decode(&kind, payload)?)),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

// ── Workstation → server ────────────────────────────────────────────

/// A frame received on a workstation channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkstationFrame {
    /// Keep-alive.
    Heartbeat,
}

impl WorkstationFrame {
    /// Parse a text frame from a workstation.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope = Envelope::parse(text)?;
        match envelope.kind.as_str() {
            "heartbeat" => Ok(Self::Heartbeat),
            _ => Err(ProtocolError::UnknownType(envelope.kind)),
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_owned(),
        message: e.to_string(),
    })
}
