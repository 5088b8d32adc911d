//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use axum::Json;
use axum::extract::Request;
use serde::Serialize;

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub identity: String,
}

/// GET /v1/auth/whoami - Return the identity behind the bearer token.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let identity = require_auth(&req)?;
    Ok(Json(WhoamiResponse {
        identity: identity.as_str().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Requester;
    use crate::error::ApiError;
    use axum::body::Body;
    use vault_core::Identity;

    #[tokio::test]
    async fn test_whoami_returns_identity() {
        let mut req = Request::new(Body::empty());
        req.extensions_mut()
            .insert(Requester(Identity::new("alice").unwrap()));

        let Json(response) = whoami(req).await.unwrap();
        assert_eq!(response.identity, "alice");
    }

    #[tokio::test]
    async fn test_whoami_requires_token() {
        let req = Request::new(Body::empty());
        assert!(matches!(whoami(req).await, Err(ApiError::Unauthorized(_))));
    }
}
