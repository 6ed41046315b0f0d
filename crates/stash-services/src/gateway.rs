//! Authorization gateway policy.
//!
//! Two schemes, never combined on one request. `X-API-Key` wins when present
//! and is only accepted on routes addressing a specific project whose id equals
//! the key's project. Otherwise a session token is read from `Authorization: Bearer`.

use stash_core::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::api_key::ApiKeyService;
use crate::session::SessionTokenService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub key_id: Uuid,
    pub project_id: Uuid,
    pub token: String,
}

/// Who is acting on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub api_key: Option<ApiKeyIdentity>,
}

/// Raw credential headers of a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub api_key: Option<&'a str>,
    pub authorization: Option<&'a str>,
}

/// The path value bound to `{id}` right after a `projects` segment, if the
/// route pattern has one.
pub fn project_segment<'a>(route: &str, path: &'a str) -> Option<&'a str> {
    let pattern: Vec<&str> = route.split('/').collect();
    let actual: Vec<&str> = path.split('/').collect();
    if pattern.len() != actual.len() {
        return None;
    }
    pattern
        .windows(2)
        .position(|pair| pair[0] == "projects" && pair[1] == "{id}")
        .map(|i| actual[i + 1])
}

pub struct AuthGateway {
    api_keys: Arc<ApiKeyService>,
    sessions: Arc<SessionTokenService>,
}

impl AuthGateway {
    pub fn new(api_keys: Arc<ApiKeyService>, sessions: Arc<SessionTokenService>) -> Self {
        Self { api_keys, sessions }
    }

    /// Resolve the acting identity. `project` is the raw `{id}` of a
    /// project-scoped route, `None` on every other route.
    pub async fn authenticate(
        &self,
        credentials: Credentials<'_>,
        project: Option<&str>,
    ) -> Result<Identity, AppError> {
        match credentials.api_key {
            Some(token) => self.authenticate_api_key(token, project).await,
            None => self.authenticate_session(credentials.authorization),
        }
    }

    async fn authenticate_api_key(
        &self,
        token: &str,
        project: Option<&str>,
    ) -> Result<Identity, AppError> {
        let Some(raw_project_id) = project else {
            return Err(AppError::Forbidden(
                "API keys can only access project resources".to_string(),
            ));
        };
        let project_id = Uuid::parse_str(raw_project_id)
            .map_err(|_| AppError::InvalidInput("Invalid project id".to_string()))?;

        let key = self.api_keys.validate(token).await?;

        if key.project_id != project_id {
            tracing::warn!(
                api_key_id = %key.id,
                key_project_id = %key.project_id,
                requested_project_id = %project_id,
                "API key used outside its project"
            );
            return Err(AppError::Forbidden(
                "API key is not valid for this project".to_string(),
            ));
        }

        Ok(Identity {
            user_id: key.user_id,
            api_key: Some(ApiKeyIdentity {
                key_id: key.id,
                project_id: key.project_id,
                token: token.to_string(),
            }),
        })
    }

    fn authenticate_session(&self, authorization: Option<&str>) -> Result<Identity, AppError> {
        let header = authorization
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized("Invalid authorization header format".to_string())
        })?;

        let claims = self.sessions.verify(token.trim())?;
        Ok(Identity {
            user_id: claims.sub,
            api_key: None,
        })
    }
}
