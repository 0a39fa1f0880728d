//! HTTP surface for requesters: create, poll, and cancel signature sessions,
//! and list the tenant's online tablets.
//!
//! The caller's tenant comes from the `X-Tenant-Id` header, set by the
//! fronting security layer.

pub mod handlers;

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sigdesk_core::TenantId;
use sigdesk_protocol::api::ErrorBody;
use sigdesk_protocol::codes;

use crate::signing::SigningError;

/// Header carrying the caller's tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Header carrying a tablet's device token.
pub const DEVICE_TOKEN_HEADER: &str = "x-device-token";

/// Error response: a status code plus an [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Build an error without details.
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_owned(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// `400 INVALID_PARAMS`.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_PARAMS, message)
    }

    /// `401 MISSING_TENANT`.
    pub fn missing_tenant() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::MISSING_TENANT,
            "missing X-Tenant-Id header",
        )
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response body.
    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        let status = match &err {
            SigningError::TabletOffline { .. }
            | SigningError::SessionNotActive { .. }
            | SigningError::CrossTenantDevice { .. } => StatusCode::CONFLICT,
            SigningError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            SigningError::SessionExpired { .. } => StatusCode::GONE,
            SigningError::DeviceMismatch { .. } => StatusCode::FORBIDDEN,
            SigningError::InvalidTimeout { .. } => StatusCode::BAD_REQUEST,
            SigningError::DispatchFailed { .. } => StatusCode::BAD_GATEWAY,
        };
        let details = match &err {
            SigningError::DispatchFailed { session_id, .. } => {
                Some(json!({ "sessionId": session_id }))
            }
            SigningError::InvalidTimeout { min, max, .. } => {
                Some(json!({ "minTimeoutMinutes": min, "maxTimeoutMinutes": max }))
            }
            _ => None,
        };
        Self {
            status,
            body: ErrorBody {
                code: err.code().to_owned(),
                message: err.to_string(),
                details,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// The caller's tenant, from `X-Tenant-Id`. Rejects with `401` when absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext(pub TenantId);

impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        tenant_from_headers(&parts.headers)
            .map(Self)
            .ok_or_else(ApiError::missing_tenant)
    }
}

/// Non-blank `X-Tenant-Id` value.
pub fn tenant_from_headers(headers: &HeaderMap) -> Option<TenantId> {
    header_str(headers, TENANT_HEADER).map(TenantId::from)
}

/// Non-blank, trimmed header value.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
