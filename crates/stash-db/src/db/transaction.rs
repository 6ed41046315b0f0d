//! Postgres implementation of the saga's transactional seam
//!
//! `PgMetadataTx` owns a `Transaction<'static, Postgres>` taken from the pool. It is
//! committed or rolled back explicitly by the coordinator; if it is dropped
//! instead, sqlx rolls it back when the connection returns to the pool.

use super::store::{MetadataStore, MetadataTx};
use super::{file, outbox, project, FileRepository, ProjectRepository};
use async_trait::async_trait;
use stash_core::{
    models::{File, NewFile, PendingCompensation, Project},
    AppError,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct PgMetadataTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MetadataTx for PgMetadataTx {
    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "insert"))]
    async fn insert_project(&mut self, owner_id: Uuid, bucket: &str) -> Result<Project, AppError> {
        project::insert(&mut *self.tx, owner_id, bucket).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "select"))]
    async fn bucket_removal_pending(&mut self, bucket: &str) -> Result<bool, AppError> {
        outbox::bucket_removal_pending(&mut *self.tx, bucket).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select", db.record_id = %id))]
    async fn get_project(&mut self, id: Uuid) -> Result<Project, AppError> {
        project::find(&mut *self.tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("project not found".to_string()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "delete", db.record_id = %id))]
    async fn delete_project(&mut self, id: Uuid) -> Result<(), AppError> {
        project::delete(&mut *self.tx, id).await
    }

    #[tracing::instrument(skip(self, file), fields(db.table = "files", db.operation = "insert"))]
    async fn insert_file(&mut self, file: &NewFile) -> Result<File, AppError> {
        file::insert(&mut *self.tx, file).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select", db.record_id = %id))]
    async fn get_file(&mut self, id: Uuid) -> Result<File, AppError> {
        file::find(&mut *self.tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("file not found".to_string()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn update_file_size(&mut self, id: Uuid, size: i64) -> Result<(), AppError> {
        file::update_size(&mut *self.tx, id, size).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "delete", db.record_id = %id))]
    async fn delete_file(&mut self, id: Uuid) -> Result<(), AppError> {
        file::delete(&mut *self.tx, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "insert"))]
    async fn stage_cleanup(&mut self, cleanup: &PendingCompensation) -> Result<Uuid, AppError> {
        outbox::insert(&mut *self.tx, cleanup).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit database transaction");
            AppError::Database(e)
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to rollback database transaction");
            AppError::Database(e)
        })
    }
}

/// Pool-backed metadata store used in production
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
    projects: ProjectRepository,
    files: FileRepository,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            projects: ProjectRepository::new(pool.clone()),
            files: FileRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin database transaction");
            AppError::Database(e)
        })?;
        Ok(Box::new(PgMetadataTx { tx }))
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        self.projects.get(id).await
    }

    async fn list_projects_by_owner(&self, owner_id: Uuid) -> Result<Vec<Project>, AppError> {
        self.projects.list_by_owner(owner_id).await
    }

    async fn find_project_by_bucket(&self, bucket: &str) -> Result<Option<Project>, AppError> {
        self.projects.find_by_bucket(bucket).await
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<File>, AppError> {
        self.files.get(id).await
    }

    async fn list_files_by_project(&self, project_id: Uuid) -> Result<Vec<File>, AppError> {
        self.files.list_by_project(project_id).await
    }

    async fn list_files_by_uploader(&self, user_id: Uuid) -> Result<Vec<File>, AppError> {
        self.files.list_by_uploader(user_id).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(AppError::Database)
    }
}
