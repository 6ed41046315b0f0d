use crate::error::ErrorResponse;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::Json;
use stash_services::Identity;
use uuid::Uuid;

/// The API key a request authenticated with.
#[derive(Debug, Clone)]
pub struct ApiKeyPrincipal {
    pub key_id: Uuid,
    pub project_id: Uuid,
    pub token: String,
}

/// Acting identity, placed in request extensions by the auth middleware
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub api_key: Option<ApiKeyPrincipal>,
}

impl From<Identity> for Principal {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            api_key: identity.api_key.map(|key| ApiKeyPrincipal {
                key_id: key.key_id,
                project_id: key.project_id,
                token: key.token,
            }),
        }
    }
}

// Read straight from the parts so it composes with `Multipart`.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Principal>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "Missing authenticated principal",
                    "MISSING_PRINCIPAL",
                )),
            )
        })
    }
}
