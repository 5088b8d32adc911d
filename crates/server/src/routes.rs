//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Capability discovery
        .route("/v1/capabilities", get(handlers::get_capabilities))
        // Auth discovery
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // File size is enforced per part while streaming, not on the whole body.
        .route(
            "/v1/files",
            post(handlers::upload_files)
                .get(handlers::list_files)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/v1/files/search", get(handlers::search_files))
        .route(
            "/v1/files/{id}",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/v1/files/{id}/download", get(handlers::download_file))
        .route(
            "/v1/files/{id}/share",
            post(handlers::enable_sharing).delete(handlers::revoke_sharing),
        )
        // Public links carry their own capability; no identity required.
        .route("/v1/public/{token}/download", get(handlers::public_download));

    let mut router = Router::new().merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    // Order of execution: CORS -> TraceLayer -> Auth -> Handler
    let router = router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// CORS policy for browser clients, or `None` when no origins are allowed.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let headers: [HeaderName; 3] = [
        AUTHORIZATION,
        CONTENT_TYPE,
        HeaderName::from_static("x-trace-id"),
    ];
    let base = CorsLayer::new().allow_methods(methods).allow_headers(headers);

    if origins.iter().any(|o| o == "*") {
        // Credentials cannot be combined with a wildcard origin.
        return Some(base.allow_origin(Any));
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Some(
        base.allow_origin(AllowOrigin::list(allowed))
            .allow_credentials(true),
    )
}
