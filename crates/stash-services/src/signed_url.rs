//! Signed download links.
//!
//! A link carries an HS256 token with typed claims `{sub: file_id, bucket, exp, iat}`.
//! Validity depends only on the signature and `exp`: there is no revocation
//! list, so a leaked link stays usable until it expires. The lifetime floor is
//! five minutes and the ceiling is optional (`SIGNED_URL_MAX_TTL_SECS`).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use stash_core::constants::{signed_url_min_ttl, SIGNED_DOWNLOAD_PATH};
use stash_core::models::{File, ShareFileResponse};
use stash_core::AppError;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlClaims {
    /// File id
    pub sub: Uuid,
    pub bucket: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct SignedUrlService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    base_url: String,
    max_ttl: Option<Duration>,
}

impl SignedUrlService {
    pub fn new(secret: &str, base_url: &str, max_ttl: Option<Duration>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_ttl,
        }
    }

    /// Mint a download link for `file`, valid until `expires_at`.
    ///
    /// Only the uploader may share a file.
    pub fn issue(
        &self,
        file: &File,
        acting_user: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<ShareFileResponse, AppError> {
        if !file.is_uploaded_by(acting_user) {
            return Err(AppError::Forbidden(
                "Only the uploader can share this file".to_string(),
            ));
        }

        let now = Utc::now();
        if expires_at <= now {
            return Err(AppError::InvalidInput(
                "Expiry must be in the future".to_string(),
            ));
        }
        if expires_at < now + signed_url_min_ttl() {
            return Err(AppError::InvalidInput(
                "Expiry must be at least 5 minutes from now".to_string(),
            ));
        }
        if let Some(max_ttl) = self.max_ttl {
            if expires_at > now + max_ttl {
                return Err(AppError::InvalidInput(format!(
                    "Expiry cannot be more than {} seconds from now",
                    max_ttl.num_seconds()
                )));
            }
        }

        let claims = SignedUrlClaims {
            sub: file.id,
            bucket: file.bucket.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign download link: {}", e)))?;

        tracing::info!(
            file_id = %file.id,
            expires_at = %expires_at,
            "Signed download link issued"
        );

        Ok(ShareFileResponse {
            download_url: format!("{}{}?token={}", self.base_url, SIGNED_DOWNLOAD_PATH, token),
            expires_at,
        })
    }

    /// Check a link token's signature and expiry.
    pub fn verify(&self, token: &str) -> Result<SignedUrlClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<SignedUrlClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Signed link rejected: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        AppError::Unauthorized("download link is no longer valid".to_string())
                    }
                    _ => AppError::Unauthorized("invalid download link".to_string()),
                }
            })
    }
}
