//! Project handlers
//!
//! Creating and deleting a project also creates and removes its bucket, through
//! the saga coordinator.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use stash_core::models::CreateProjectRequest;
use std::sync::Arc;
use uuid::Uuid;

use super::MessageResponse;
use crate::auth::Principal;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[tracing::instrument(skip(state, principal), fields(user_id = %principal.user_id))]
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let project = state
        .saga
        .create_project(principal.user_id, &request.bucket)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[tracing::instrument(skip(state, principal))]
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, HttpAppError> {
    let projects = state.catalog.list_projects(principal.user_id).await?;
    Ok(Json(projects))
}

#[tracing::instrument(skip(state, principal))]
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let project = state.catalog.get_project(id, principal.user_id).await?;
    Ok(Json(project))
}

#[tracing::instrument(skip(state, principal))]
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let project = state.saga.delete_project(id, principal.user_id).await?;
    Ok(Json(MessageResponse {
        message: format!("Project {} deleted", project.bucket),
        id: project.id,
    }))
}
