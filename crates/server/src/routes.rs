//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_SECURITY_POLICY;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_request_size).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        // Health check (unauthenticated, for load balancers)
        .route("/health", get(handlers::health_check))
        .route("/sites", get(handlers::list_sites))
        .route(
            "/sites/upload-folder",
            post(handlers::upload_folder).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/sites/finalize-upload", post(handlers::finalize_upload))
        .route(
            "/sites/{site_id}",
            get(handlers::get_site).delete(handlers::delete_site),
        )
        .route(
            "/sites/{site_id}/upload-session",
            get(handlers::get_upload_session),
        );

    // Site content: open CORS, configured CSP
    let serving_routes = Router::new()
        .route("/sites/{site_id}/raw", get(handlers::serve_raw))
        .route("/sites/{site_id}/proxy", get(handlers::serve_root))
        .route("/sites/{site_id}/proxy/", get(handlers::serve_root))
        .route("/sites/{site_id}/proxy/{*path}", get(handlers::serve_path))
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_str(&state.config.proxy.content_security_policy).ok(),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
                .allow_headers(Any),
        );

    let mut router = Router::new().merge(api_routes).merge(serving_routes);

    // When enabled, this endpoint should be network-restricted to the
    // Prometheus scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
