//! Public sharing endpoints.

use super::files::content_response;
use crate::auth::require_auth;
use crate::engine::DownloadKind;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;
use vault_core::FileId;

/// Share response.
#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub token: String,
    /// Download link, absolute when `server.public_base_url` is set.
    pub url: String,
}

/// POST /v1/files/{id}/share - Make a file public.
#[tracing::instrument(skip(state, req), fields(file_id = %id))]
pub async fn enable_sharing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Json<ShareResponse>> {
    let requester = require_auth(&req)?;
    let id = FileId::parse(&id)?;
    let token = state.sharing.enable_public_sharing(requester, id).await?;
    let url = state.config.server.public_download_url(token.as_str());
    Ok(Json(ShareResponse {
        token: token.into_inner(),
        url,
    }))
}

/// DELETE /v1/files/{id}/share - Make a file private again.
#[tracing::instrument(skip(state, req), fields(file_id = %id))]
pub async fn revoke_sharing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let requester = require_auth(&req)?;
    let id = FileId::parse(&id)?;
    state.sharing.revoke_public_sharing(requester, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/public/{token}/download - Download a shared file without credentials.
#[tracing::instrument(skip_all)]
pub async fn public_download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let record = state.sharing.resolve_public_download(&token).await?;
    let stream = state
        .engine
        .open_content(&record, DownloadKind::Public)
        .await?;
    Ok(content_response(&record, stream))
}
