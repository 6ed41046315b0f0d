//! Project API keys: issuance, validation and management.
//!
//! A key is `{prefix}_{secret}` where the secret is 32 random bytes encoded as
//! unpadded base64url. Only an Argon2 PHC hash of the whole key is stored, along
//! with its first 16 characters, which narrows validation to a handful of rows.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use stash_core::constants::{
    api_key_max_ttl, api_key_min_ttl, API_KEY_LOOKUP_PREFIX_LEN, API_KEY_SECRET_BYTES,
};
use stash_core::models::{ApiKey, NewApiKey};
use stash_core::AppError;
use stash_db::{ApiKeyStore, MetadataStore};
use std::sync::Arc;
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "Invalid or expired credentials";

/// A freshly issued key. `token` is the only copy of the secret.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub token: String,
}

/// Generate a new API key with the given prefix
pub fn generate_api_key(prefix: &str) -> String {
    let mut secret = [0u8; API_KEY_SECRET_BYTES];
    rand::rng().fill_bytes(&mut secret);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(secret))
}

/// Hash an API key for storage
pub fn hash_api_key(key: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash API key: {}", e)))
}

/// Verify an API key against a stored hash
pub fn verify_api_key(key: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid hash format: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(key.as_bytes(), &parsed_hash)
        .is_ok())
}

/// The lookup prefix of a key, or `None` if it is too short to be one.
pub fn extract_key_prefix(key: &str) -> Option<&str> {
    key.get(..API_KEY_LOOKUP_PREFIX_LEN)
}

pub struct ApiKeyService {
    keys: Arc<dyn ApiKeyStore>,
    metadata: Arc<dyn MetadataStore>,
    prefix: String,
}

impl ApiKeyService {
    pub fn new(
        keys: Arc<dyn ApiKeyStore>,
        metadata: Arc<dyn MetadataStore>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            metadata,
            prefix: prefix.into(),
        }
    }

    async fn owned_project(&self, project_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let project = self
            .metadata
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
        if !project.is_owned_by(user_id) {
            return Err(AppError::Forbidden(
                "Only the project owner can manage its API keys".to_string(),
            ));
        }
        Ok(())
    }

    /// Issue a key bound to one project, valid until `expires_at`.
    pub async fn issue(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedApiKey, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput(
                "API key name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        if expires_at < now + api_key_min_ttl() {
            return Err(AppError::InvalidInput(
                "API key must be valid for at least one hour".to_string(),
            ));
        }
        if expires_at > now + api_key_max_ttl() {
            return Err(AppError::InvalidInput(
                "API key cannot be valid for more than one year".to_string(),
            ));
        }

        self.owned_project(project_id, user_id).await?;

        let token = generate_api_key(&self.prefix);
        let key_prefix = extract_key_prefix(&token)
            .ok_or_else(|| AppError::Internal("Generated API key is too short".to_string()))?
            .to_string();
        let key_hash = hash_api_key(&token)?;

        let key = self
            .keys
            .create(&NewApiKey {
                key_prefix,
                key_hash,
                name: name.to_string(),
                project_id,
                user_id,
                expires_at,
            })
            .await?;

        tracing::info!(
            api_key_id = %key.id,
            project_id = %project_id,
            key_prefix = %key.key_prefix,
            "API key issued"
        );
        Ok(IssuedApiKey { key, token })
    }

    /// Resolve a presented key. Every failure is the same `Unauthorized`.
    pub async fn validate(&self, token: &str) -> Result<ApiKey, AppError> {
        let unauthorized = || AppError::Unauthorized(INVALID_CREDENTIALS.to_string());

        let key_prefix = extract_key_prefix(token).ok_or_else(unauthorized)?;
        let candidates = self.keys.find_by_prefix(key_prefix).await?;

        let now = Utc::now();
        for candidate in candidates {
            match verify_api_key(token, &candidate.key_hash) {
                Ok(true) if candidate.is_valid_at(now) => return Ok(candidate),
                Ok(true) => {
                    tracing::debug!(api_key_id = %candidate.id, "API key expired or revoked");
                    return Err(unauthorized());
                }
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(api_key_id = %candidate.id, error = %e, "Stored API key hash unreadable");
                    continue;
                }
            }
        }

        Err(unauthorized())
    }

    pub async fn list_project_api_keys(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ApiKey>, AppError> {
        self.owned_project(project_id, user_id).await?;
        self.keys.list_by_project(project_id, user_id).await
    }

    pub async fn list_user_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        self.keys.list_by_user(user_id).await
    }

    pub async fn get_api_key(&self, id: Uuid, user_id: Uuid) -> Result<ApiKey, AppError> {
        self.keys
            .get(id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("API key not found".to_string()))
    }

    /// Revoke a key. Revoking twice, or someone else's key, is `NotFound`.
    pub async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        if !self.keys.revoke(id, user_id).await? {
            return Err(AppError::NotFound(
                "API key not found or already revoked".to_string(),
            ));
        }
        tracing::info!(api_key_id = %id, "API key revoked");
        Ok(())
    }

    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        if !self.keys.delete(id, user_id).await? {
            return Err(AppError::NotFound("API key not found".to_string()));
        }
        tracing::info!(api_key_id = %id, "API key deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stash_db::MemoryMetadataStore;

    fn service() -> (MemoryMetadataStore, ApiKeyService) {
        let meta = MemoryMetadataStore::new();
        let svc = ApiKeyService::new(Arc::new(meta.clone()), Arc::new(meta.clone()), "sgs");
        (meta, svc)
    }

    #[test]
    fn test_generate_api_key() {
        let key = generate_api_key("sgs");
        assert!(key.starts_with("sgs_"));
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(key.len(), 4 + 43);
        assert_ne!(key, generate_api_key("sgs"));
    }

    #[test]
    fn test_hash_and_verify_api_key() {
        let key = generate_api_key("sgs");
        let hash = hash_api_key(&key).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_api_key(&key, &hash).unwrap());
        assert!(!verify_api_key("sgs_wrong", &hash).unwrap());
    }

    #[test]
    fn test_extract_key_prefix() {
        assert_eq!(extract_key_prefix("sgs_abc123def456ghi"), Some("sgs_abc123def456"));
        assert_eq!(extract_key_prefix("short"), None);
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");

        let issued = svc
            .issue(owner, project.id, "ci-key", Utc::now() + Duration::hours(2))
            .await
            .unwrap();

        assert_eq!(issued.key.name, "ci-key");
        assert_eq!(issued.key.project_id, project.id);
        assert_ne!(issued.key.key_hash, issued.token);
        assert!(issued.token.starts_with(&issued.key.key_prefix));

        let validated = svc.validate(&issued.token).await.unwrap();
        assert_eq!(validated.id, issued.key.id);
    }

    #[tokio::test]
    async fn test_issue_rejects_expiry_outside_window() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");

        for expires_at in [
            Utc::now() - Duration::minutes(1),
            Utc::now() + Duration::minutes(30),
            Utc::now() + Duration::days(400),
        ] {
            let result = svc.issue(owner, project.id, "ci-key", expires_at).await;
            assert!(matches!(result, Err(AppError::InvalidInput(_))));
        }
    }

    #[tokio::test]
    async fn test_issue_requires_existing_owned_project() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");
        let expires_at = Utc::now() + Duration::hours(2);

        let result = svc.issue(Uuid::new_v4(), project.id, "ci-key", expires_at).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let result = svc.issue(owner, Uuid::new_v4(), "ci-key", expires_at).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validate_failures_are_uniform() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");
        let issued = svc
            .issue(owner, project.id, "ci-key", Utc::now() + Duration::hours(2))
            .await
            .unwrap();

        let mut tampered = issued.token.clone();
        tampered.push('x');

        let assert_rejected = |result: Result<ApiKey, AppError>| match result {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, INVALID_CREDENTIALS),
            other => panic!("expected uniform unauthorized, got {:?}", other),
        };

        assert_rejected(svc.validate("nope").await);
        assert_rejected(svc.validate("sgs_AAAAAAAAAAAAAAAAAAAAAAAAAAAA").await);
        assert_rejected(svc.validate(&tampered).await);

        svc.revoke(issued.key.id, owner).await.unwrap();
        assert_rejected(svc.validate(&issued.token).await);
    }

    #[tokio::test]
    async fn test_revoke_twice_is_not_found() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");
        let issued = svc
            .issue(owner, project.id, "ci-key", Utc::now() + Duration::hours(2))
            .await
            .unwrap();

        svc.revoke(issued.key.id, owner).await.unwrap();
        let second = svc.revoke(issued.key.id, owner).await;
        assert!(matches!(second, Err(AppError::NotFound(_))));

        let key = svc.get_api_key(issued.key.id, owner).await.unwrap();
        assert!(key.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_management_is_scoped_to_user() {
        let (meta, svc) = service();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let project = meta.seed_project(owner, "proj-abc");
        let issued = svc
            .issue(owner, project.id, "ci-key", Utc::now() + Duration::hours(2))
            .await
            .unwrap();

        assert_eq!(svc.list_user_api_keys(owner).await.unwrap().len(), 1);
        assert_eq!(
            svc.list_project_api_keys(project.id, owner).await.unwrap().len(),
            1
        );
        assert!(svc.list_user_api_keys(stranger).await.unwrap().is_empty());
        assert!(matches!(
            svc.get_api_key(issued.key.id, stranger).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.delete(issued.key.id, stranger).await,
            Err(AppError::NotFound(_))
        ));

        svc.delete(issued.key.id, owner).await.unwrap();
        assert!(matches!(
            svc.delete(issued.key.id, owner).await,
            Err(AppError::NotFound(_))
        ));
    }
}
