//! Request handlers for `/api/*`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use sigdesk_core::SessionId;
use sigdesk_protocol::api::{
    CancelSignatureRequest, CreateSignatureRequest, CreateSignatureResponse, OnlineTablet,
    SignatureStatusView, TabletListResponse,
};

use super::{ApiError, TenantContext};
use crate::server::AppState;

/// `POST /api/signatures`
pub async fn create_signature(
    State(state): State<AppState>,
    TenantContext(tenant_id): TenantContext,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSignatureResponse>), ApiError> {
    let request: CreateSignatureRequest = parse_body(&body)?;
    let session = state.orchestrator.create_session(&tenant_id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSignatureResponse {
            session_id: session.id,
            status: session.status,
            expires_at: session.expires_at,
        }),
    ))
}

/// `GET /api/signatures/{id}`
pub async fn get_signature(
    State(state): State<AppState>,
    TenantContext(tenant_id): TenantContext,
    Path(session_id): Path<String>,
) -> Result<Json<SignatureStatusView>, ApiError> {
    let session = state
        .orchestrator
        .session_status(&SessionId::from(session_id), &tenant_id)?;
    Ok(Json(SignatureStatusView::from(&session)))
}

/// `POST /api/signatures/{id}/cancel`. The body is optional.
pub async fn cancel_signature(
    State(state): State<AppState>,
    TenantContext(tenant_id): TenantContext,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<SignatureStatusView>, ApiError> {
    let request: CancelSignatureRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelSignatureRequest::default()
    } else {
        parse_body(&body)?
    };
    let session = state.orchestrator.cancel_session(
        &SessionId::from(session_id),
        &tenant_id,
        request.reason,
    )?;
    Ok(Json(SignatureStatusView::from(&session)))
}

/// `GET /api/tablets`
pub async fn list_tablets(
    State(state): State<AppState>,
    TenantContext(tenant_id): TenantContext,
) -> Json<TabletListResponse> {
    let tablets = state
        .registry
        .online_tablets(&tenant_id)
        .iter()
        .map(|t| OnlineTablet {
            tablet_id: t.tablet_id.clone(),
            location_id: t.location_id.clone(),
            connected_at: t.channel.connected_at(),
            last_seen_at: t.last_seen_at(),
        })
        .collect();
    Json(TabletListResponse { tablets })
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_params(format!("invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_body_rejects_missing_fields() {
        let err = parse_body::<CreateSignatureRequest>(br#"{"tabletId":"tab-1"}"#).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body().code, "INVALID_PARAMS");
    }

    #[test]
    fn parse_body_accepts_cancel_reason() {
        let req: CancelSignatureRequest = parse_body(br#"{"reason":"walked out"}"#).unwrap();
        assert_eq!(req.reason.as_deref(), Some("walked out"));
    }
}
