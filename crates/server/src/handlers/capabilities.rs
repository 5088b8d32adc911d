//! Capability discovery and health endpoints.

use crate::engine::EngineError;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Largest single file accepted by an upload, in bytes.
    pub max_upload_bytes: u64,
    /// Multipart field names that carry files.
    pub upload_fields: &'static [&'static str],
    /// Hash algorithm used for content addressing.
    pub digest_algorithm: &'static str,
    /// Whether public share links can be issued.
    pub supports_public_sharing: bool,
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    Ok(Json(CapabilitiesResponse {
        max_upload_bytes: state.config.server.max_upload_bytes,
        upload_fields: super::files::UPLOAD_FIELDS,
        digest_algorithm: "sha256",
        supports_public_sharing: true,
        api_version: "v1",
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health
///
/// Unauthenticated so load balancers can probe it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state
        .metadata
        .health_check()
        .await
        .map_err(EngineError::from)?;
    state
        .storage
        .health_check()
        .await
        .map_err(EngineError::from)?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
