use super::map_db_error;
use stash_core::{
    models::{File, NewFile},
    AppError,
};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

/// File rows always carry the owning project's bucket.
const SELECT_FILE: &str = r#"
    SELECT f.id, f.filename, f.object_name, f.project_id, f.size, f.content_type,
           f.uploaded_by, f.created_at, p.bucket
    FROM files f
    JOIN projects p ON p.id = f.project_id
"#;

pub(crate) async fn insert<'e, E>(exec: E, file: &NewFile) -> Result<File, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<Postgres, File>(
        r#"
        WITH ins AS (
            INSERT INTO files (filename, object_name, project_id, size, content_type, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        )
        SELECT ins.id, ins.filename, ins.object_name, ins.project_id, ins.size,
               ins.content_type, ins.uploaded_by, ins.created_at, p.bucket
        FROM ins
        JOIN projects p ON p.id = ins.project_id
        "#,
    )
    .bind(&file.filename)
    .bind(&file.object_name)
    .bind(file.project_id)
    .bind(file.size)
    .bind(&file.content_type)
    .bind(file.uploaded_by)
    .fetch_one(exec)
    .await
    .map_err(|e| map_db_error(e, "file", "Failed to insert file"))
}

pub(crate) async fn find<'e, E>(exec: E, id: Uuid) -> Result<Option<File>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<Postgres, File>(&format!("{} WHERE f.id = $1", SELECT_FILE))
        .bind(id)
        .fetch_optional(exec)
        .await
        .map_err(|e| map_db_error(e, "file", "Failed to get file"))
}

pub(crate) async fn update_size<'e, E>(exec: E, id: Uuid, size: i64) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("UPDATE files SET size = $2 WHERE id = $1")
        .bind(id)
        .bind(size)
        .execute(exec)
        .await
        .map_err(|e| map_db_error(e, "file", "Failed to update file size"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("file not found".to_string()));
    }
    Ok(())
}

pub(crate) async fn delete<'e, E>(exec: E, id: Uuid) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM files WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await
        .map_err(|e| map_db_error(e, "file", "Failed to delete file"))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("file not found".to_string()));
    }
    Ok(())
}

/// Repository for reading file metadata outside a saga transaction
#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<File>, AppError> {
        find(&self.pool, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    pub async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<File>, AppError> {
        sqlx::query_as::<Postgres, File>(&format!(
            "{} WHERE f.project_id = $1 ORDER BY f.created_at DESC",
            SELECT_FILE
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, project_id = %project_id, "Failed to list files");
            AppError::Database(e)
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    pub async fn list_by_uploader(&self, user_id: Uuid) -> Result<Vec<File>, AppError> {
        sqlx::query_as::<Postgres, File>(&format!(
            "{} WHERE f.uploaded_by = $1 ORDER BY f.created_at DESC",
            SELECT_FILE
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %user_id, "Failed to list files");
            AppError::Database(e)
        })
    }
}
