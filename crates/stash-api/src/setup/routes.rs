//! Route configuration and setup
//!
//! Every route is mounted under `/api`. Authenticated routes carry the auth
//! middleware as a route layer so it sees the matched route pattern.

use crate::auth::{auth_middleware, AuthState};
use crate::handlers::{api_keys, files, health, projects};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use stash_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_HTTP_CONCURRENCY_LIMIT: usize = 10_000;

/// Build the application router over `state`
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let auth_state = Arc::new(AuthState {
        gateway: state.gateway.clone(),
    });

    let protected = protected_routes().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        auth_middleware,
    ));
    let max_body = config.max_upload_size_bytes();

    // Server-level cap on in-flight requests
    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HTTP_CONCURRENCY_LIMIT)
        .max(1);

    public_routes()
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/files/download-signed", get(files::download_signed))
}

fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/projects",
            post(projects::create_project).get(projects::list_projects),
        )
        .route(
            "/api/projects/{id}",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route(
            "/api/projects/{id}/files",
            post(files::upload_file).get(files::list_project_files),
        )
        .route(
            "/api/projects/{id}/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_project_api_keys),
        )
        .route("/api/files", get(files::list_files))
        .route(
            "/api/files/{id}",
            get(files::get_file).delete(files::delete_file),
        )
        .route("/api/files/{id}/download", get(files::download_file))
        .route("/api/files/{id}/share", post(files::share_file))
        .route("/api/api-keys", get(api_keys::list_api_keys))
        .route(
            "/api/api-keys/{id}",
            get(api_keys::get_api_key).delete(api_keys::delete_api_key),
        )
        .route("/api/api-keys/{id}/revoke", patch(api_keys::revoke_api_key))
}
