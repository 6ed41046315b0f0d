use super::map_db_error;
use stash_core::{models::Project, AppError};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, owner_id, bucket, created_at, updated_at";

pub(crate) async fn insert<'e, E>(exec: E, owner_id: Uuid, bucket: &str) -> Result<Project, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<Postgres, Project>(&format!(
        "INSERT INTO projects (owner_id, bucket) VALUES ($1, $2) RETURNING {}",
        PROJECT_COLUMNS
    ))
    .bind(owner_id)
    .bind(bucket)
    .fetch_one(exec)
    .await
    .map_err(|e| map_db_error(e, "project", "Failed to insert project"))
}

pub(crate) async fn find<'e, E>(exec: E, id: Uuid) -> Result<Option<Project>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<Postgres, Project>(&format!(
        "SELECT {} FROM projects WHERE id = $1",
        PROJECT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(exec)
    .await
    .map_err(|e| map_db_error(e, "project", "Failed to get project"))
}

pub(crate) async fn delete<'e, E>(exec: E, id: Uuid) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await
        .map_err(|e| map_db_error(e, "project", "Failed to delete project"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("project not found".to_string()));
    }
    Ok(())
}

/// Repository for reading projects outside a saga transaction
#[derive(Clone)]
pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        find(&self.pool, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select"))]
    pub async fn find_by_bucket(&self, bucket: &str) -> Result<Option<Project>, AppError> {
        sqlx::query_as::<Postgres, Project>(&format!(
            "SELECT {} FROM projects WHERE bucket = $1",
            PROJECT_COLUMNS
        ))
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "project", "Failed to find project by bucket"))
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select"))]
    pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Project>, AppError> {
        sqlx::query_as::<Postgres, Project>(&format!(
            "SELECT {} FROM projects WHERE owner_id = $1 ORDER BY created_at DESC",
            PROJECT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, owner_id = %owner_id, "Failed to list projects");
            AppError::Database(e)
        })
    }
}
