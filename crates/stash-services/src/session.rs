//! HS256 session tokens carried as `Authorization: Bearer`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use stash_core::AppError;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid, // user_id
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl SessionTokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            username: username.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Session token rejected: {}", e);
                AppError::Unauthorized("Invalid or expired credentials".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    #[test]
    fn test_issue_and_verify() {
        let service = SessionTokenService::new(SECRET, Duration::hours(24));
        let user = Uuid::new_v4();

        let token = service.issue(user, "alice").unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_session_rejected() {
        let service = SessionTokenService::new(SECRET, Duration::seconds(-60));
        let token = service.issue(Uuid::new_v4(), "alice").unwrap();
        assert!(matches!(service.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = SessionTokenService::new(SECRET, Duration::hours(1));
        let verifier = SessionTokenService::new("a-completely-different-secret-value", Duration::hours(1));
        let token = issuer.issue(Uuid::new_v4(), "alice").unwrap();
        assert!(matches!(verifier.verify(&token), Err(AppError::Unauthorized(_))));
    }
}
