//! Configuration module
//!
//! Server, database, authentication, storage and reconciliation settings,
//! all read from the environment.

use std::env;
use std::path::PathBuf;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 8080;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SESSION_TTL_HOURS: i64 = 24;
const API_KEY_PREFIX: &str = "sgs";
const LOCAL_STORAGE_PATH: &str = "./data/blobs";
const S3_REGION: &str = "us-east-1";
const RECONCILE_INTERVAL_SECS: u64 = 30;
const RECONCILE_BATCH_SIZE: i64 = 50;
const RECONCILE_MAX_ATTEMPTS: i32 = 10;
const MAX_UPLOAD_SIZE_MB: usize = 100;

#[derive(Clone, Debug)]
pub struct StashConfig {
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub base_url: String,
    pub api_key_prefix: String,
    pub signed_url_max_ttl_secs: Option<i64>,
    pub storage_backend: StorageBackend,
    pub local_storage_path: PathBuf,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
    pub reconcile_max_attempts: i32,
    pub max_upload_size_bytes: usize,
    pub environment: String,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<StashConfig>);

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = StashConfig::from_env()?;
        config.validate()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.0.validate()
    }

    pub fn is_production(&self) -> bool {
        let env = self.0.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.0.server_port
    }

    pub fn database_url(&self) -> &str {
        &self.0.database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.0.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.0.db_timeout_seconds
    }

    pub fn jwt_secret(&self) -> &str {
        &self.0.jwt_secret
    }

    pub fn session_ttl_hours(&self) -> i64 {
        self.0.session_ttl_hours
    }

    pub fn base_url(&self) -> &str {
        &self.0.base_url
    }

    pub fn api_key_prefix(&self) -> &str {
        &self.0.api_key_prefix
    }

    pub fn signed_url_max_ttl_secs(&self) -> Option<i64> {
        self.0.signed_url_max_ttl_secs
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.0.storage_backend
    }

    pub fn local_storage_path(&self) -> &PathBuf {
        &self.0.local_storage_path
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.0.s3_endpoint.as_deref()
    }

    pub fn s3_region(&self) -> &str {
        &self.0.s3_region
    }

    pub fn reconcile_interval_secs(&self) -> u64 {
        self.0.reconcile_interval_secs
    }

    pub fn reconcile_batch_size(&self) -> i64 {
        self.0.reconcile_batch_size
    }

    pub fn reconcile_max_attempts(&self) -> i32 {
        self.0.reconcile_max_attempts
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.0.max_upload_size_bytes
    }

    pub fn environment(&self) -> &str {
        &self.0.environment
    }
}

impl StashConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let server_port = env::var("PORT")
            .unwrap_or_else(|_| SERVER_PORT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        let max_upload_size_mb = env::var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|_| MAX_UPLOAD_SIZE_MB.to_string())
            .parse::<usize>()
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let signed_url_max_ttl_secs = match env::var("SIGNED_URL_MAX_TTL_SECS") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<i64>().map_err(|_| {
                anyhow::anyhow!("SIGNED_URL_MAX_TTL_SECS must be a number of seconds")
            })?),
            _ => None,
        };

        Ok(Self {
            server_port,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set for authentication"))?,
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| SESSION_TTL_HOURS.to_string())
                .parse()
                .unwrap_or(SESSION_TTL_HOURS),
            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", server_port))
                .trim_end_matches('/')
                .to_string(),
            api_key_prefix: env::var("API_KEY_PREFIX")
                .unwrap_or_else(|_| API_KEY_PREFIX.to_string()),
            signed_url_max_ttl_secs,
            storage_backend,
            local_storage_path: PathBuf::from(
                env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| LOCAL_STORAGE_PATH.to_string()),
            ),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.trim().is_empty()),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| S3_REGION.to_string()),
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| RECONCILE_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(RECONCILE_INTERVAL_SECS),
            reconcile_batch_size: env::var("RECONCILE_BATCH_SIZE")
                .unwrap_or_else(|_| RECONCILE_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(RECONCILE_BATCH_SIZE),
            reconcile_max_attempts: env::var("RECONCILE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| RECONCILE_MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(RECONCILE_MAX_ATTEMPTS),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            environment,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long"
            ));
        }

        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        let prefix_ok = (2..=8).contains(&self.api_key_prefix.len())
            && self.api_key_prefix.chars().all(|c| c.is_ascii_alphanumeric());
        if !prefix_ok {
            return Err(anyhow::anyhow!(
                "API_KEY_PREFIX must be 2-8 alphanumeric characters"
            ));
        }

        if let Some(max) = self.signed_url_max_ttl_secs {
            if max < crate::constants::signed_url_min_ttl().num_seconds() {
                return Err(anyhow::anyhow!(
                    "SIGNED_URL_MAX_TTL_SECS must be at least 300 seconds"
                ));
            }
        }

        if self.reconcile_batch_size <= 0 {
            return Err(anyhow::anyhow!("RECONCILE_BATCH_SIZE must be positive"));
        }

        if self.reconcile_max_attempts <= 0 {
            return Err(anyhow::anyhow!("RECONCILE_MAX_ATTEMPTS must be positive"));
        }

        if self.session_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("SESSION_TTL_HOURS must be positive"));
        }

        Ok(())
    }
}
