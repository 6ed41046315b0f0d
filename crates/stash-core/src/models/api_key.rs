use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Project-scoped API key. Only a hash of the secret is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ApiKey {
    pub id: Uuid,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub name: String,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// A key is usable only while unrevoked and unexpired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Values for an API key row.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub key_prefix: String,
    pub key_hash: String,
    pub name: String,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Request to create a new API key
#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "API key name must be between 1 and 100 characters"
    ))]
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

/// Response when creating an API key (includes the raw key - only shown once)
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,
    /// The full API key - it won't be shown again
    pub api_key: String,
    pub name: String,
    pub project_id: Uuid,
    pub key_prefix: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// API key information (without the secret or its hash)
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub project_id: Uuid,
    pub key_prefix: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            project_id: key.project_id,
            key_prefix: key.key_prefix,
            expires_at: key.expires_at,
            revoked_at: key.revoked_at,
            created_at: key.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_in: Duration, revoked: bool) -> ApiKey {
        let now = Utc::now();
        ApiKey {
            id: Uuid::new_v4(),
            key_prefix: "sgs_abcdefghijkl".to_string(),
            key_hash: "$argon2id$...".to_string(),
            name: "ci-key".to_string(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            expires_at: now + expires_in,
            revoked_at: revoked.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn test_is_valid_at() {
        let now = Utc::now();
        assert!(key(Duration::hours(2), false).is_valid_at(now));
        assert!(!key(Duration::hours(-1), false).is_valid_at(now));
        assert!(!key(Duration::hours(2), true).is_valid_at(now));
    }

    #[test]
    fn test_hash_is_not_serialized() {
        let json = serde_json::to_value(key(Duration::hours(2), false)).unwrap();
        assert!(json.get("key_hash").is_none());
        assert!(json.get("key_prefix").is_some());
    }
}
