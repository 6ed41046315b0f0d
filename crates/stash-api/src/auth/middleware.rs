use axum::{
    extract::{MatchedPath, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use stash_core::constants::API_KEY_HEADER;
use stash_services::{project_segment, AuthGateway, Credentials};
use std::sync::Arc;

use super::models::Principal;
use crate::error::HttpAppError;

#[derive(Clone)]
pub struct AuthState {
    pub gateway: Arc<AuthGateway>,
}

/// Resolve the caller from `X-API-Key` or `Authorization: Bearer` and attach a
/// [`Principal`] to the request.
///
/// Runs as a route layer, so the matched route pattern is available for
/// scoping API keys to the project in the path.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Owned copies: the request body is not `Sync`, so no borrow of the
    // request may live across the await below.
    let (api_key, authorization, project) = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let project = request
            .extensions()
            .get::<MatchedPath>()
            .and_then(|route| project_segment(route.as_str(), request.uri().path()))
            .map(str::to_string);
        (header(API_KEY_HEADER), header(AUTHORIZATION.as_str()), project)
    };

    let credentials = Credentials {
        api_key: api_key.as_deref(),
        authorization: authorization.as_deref(),
    };
    let outcome = auth_state
        .gateway
        .authenticate(credentials, project.as_deref())
        .await;

    let identity = match outcome {
        Ok(identity) => identity,
        Err(e) => return HttpAppError(e).into_response(),
    };

    tracing::debug!(
        user_id = %identity.user_id,
        api_key_id = ?identity.api_key.as_ref().map(|k| k.key_id),
        "Request authenticated"
    );

    request.extensions_mut().insert(Principal::from(identity));
    next.run(request).await
}
