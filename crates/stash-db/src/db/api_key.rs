use super::store::ApiKeyStore;
use async_trait::async_trait;
use stash_core::{
    models::{ApiKey, NewApiKey},
    AppError,
};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for ApiKeyRepository {
    #[tracing::instrument(skip(self, key), fields(db.table = "api_keys", db.operation = "insert"))]
    async fn create(&self, key: &NewApiKey) -> Result<ApiKey, AppError> {
        let api_key = sqlx::query_as::<Postgres, ApiKey>(
            r#"
            INSERT INTO api_keys (key_prefix, key_hash, name, project_id, user_id, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(&key.name)
        .bind(key.project_id)
        .bind(key.user_id)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create API key");
            AppError::Database(e)
        })?;

        tracing::info!(
            api_key_id = %api_key.id,
            project_id = %api_key.project_id,
            name = %api_key.name,
            "API key created"
        );

        Ok(api_key)
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "select"))]
    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>, AppError> {
        sqlx::query_as::<Postgres, ApiKey>(
            r#"
            SELECT * FROM api_keys
            WHERE key_prefix = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get API keys by prefix");
            AppError::Database(e)
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "select"))]
    async fn get(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>, AppError> {
        sqlx::query_as::<Postgres, ApiKey>("SELECT * FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, id = %id, "Failed to get API key");
                AppError::Database(e)
            })
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "select"))]
    async fn list_by_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ApiKey>, AppError> {
        sqlx::query_as::<Postgres, ApiKey>(
            r#"
            SELECT * FROM api_keys
            WHERE project_id = $1 AND user_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, project_id = %project_id, "Failed to list API keys");
            AppError::Database(e)
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "select"))]
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        sqlx::query_as::<Postgres, ApiKey>(
            "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %user_id, "Failed to list API keys");
            AppError::Database(e)
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "update"))]
    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET revoked_at = NOW()
            WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %id, "Failed to revoke API key");
            AppError::Database(e)
        })?;

        let revoked = result.rows_affected() > 0;
        if revoked {
            tracing::info!(api_key_id = %id, user_id = %user_id, "API key revoked");
        }
        Ok(revoked)
    }

    #[tracing::instrument(skip(self), fields(db.table = "api_keys", db.operation = "delete"))]
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, id = %id, "Failed to delete API key");
                AppError::Database(e)
            })?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(api_key_id = %id, user_id = %user_id, "API key deleted");
        }
        Ok(deleted)
    }
}
