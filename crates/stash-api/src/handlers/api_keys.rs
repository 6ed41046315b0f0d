//! API key management handlers
//!
//! Keys are bound to one project. The raw key is only returned by create.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use stash_core::models::{ApiKeyResponse, CreateApiKeyRequest, CreateApiKeyResponse};
use std::sync::Arc;
use uuid::Uuid;

use super::MessageResponse;
use crate::auth::Principal;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

/// Create a new API key for a project
#[tracing::instrument(skip(state, principal, request), fields(user_id = %principal.user_id))]
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let issued = state
        .api_keys
        .issue(
            principal.user_id,
            project_id,
            &request.name,
            request.expires_at,
        )
        .await?;

    let response = CreateApiKeyResponse {
        id: issued.key.id,
        api_key: issued.token,
        name: issued.key.name,
        project_id: issued.key.project_id,
        key_prefix: issued.key.key_prefix,
        expires_at: issued.key.expires_at,
        created_at: issued.key.created_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[tracing::instrument(skip(state, principal))]
pub async fn list_project_api_keys(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let keys = state
        .api_keys
        .list_project_api_keys(project_id, principal.user_id)
        .await?;
    let response: Vec<ApiKeyResponse> = keys.into_iter().map(ApiKeyResponse::from).collect();
    Ok(Json(response))
}

#[tracing::instrument(skip(state, principal))]
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, HttpAppError> {
    let keys = state.api_keys.list_user_api_keys(principal.user_id).await?;
    let response: Vec<ApiKeyResponse> = keys.into_iter().map(ApiKeyResponse::from).collect();
    Ok(Json(response))
}

#[tracing::instrument(skip(state, principal))]
pub async fn get_api_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let key = state.api_keys.get_api_key(id, principal.user_id).await?;
    Ok(Json(ApiKeyResponse::from(key)))
}

/// Revoke an API key. Revoking twice is a 404.
#[tracing::instrument(skip(state, principal))]
pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    state.api_keys.revoke(id, principal.user_id).await?;
    tracing::info!(api_key_id = %id, "API key revoked");
    Ok(Json(MessageResponse {
        message: "API key revoked successfully".to_string(),
        id,
    }))
}

#[tracing::instrument(skip(state, principal))]
pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    state.api_keys.delete(id, principal.user_id).await?;
    Ok(Json(MessageResponse {
        message: "API key deleted".to_string(),
        id,
    }))
}
