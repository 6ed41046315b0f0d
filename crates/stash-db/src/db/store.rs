//! Storage-agnostic seams over the metadata database.
//!
//! The saga coordinator and token services depend on these traits only, so
//! they can run against Postgres in production and the in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::models::{
    ApiKey, File, NewApiKey, NewFile, OutboxEntry, PendingCompensation, Project,
};
use stash_core::AppError;
use uuid::Uuid;

/// One metadata transaction. Writes are invisible outside it until `commit`.
#[async_trait]
pub trait MetadataTx: Send {
    async fn insert_project(&mut self, owner_id: Uuid, bucket: &str) -> Result<Project, AppError>;

    /// Whether a `remove_bucket` cleanup for `bucket` is still pending.
    async fn bucket_removal_pending(&mut self, bucket: &str) -> Result<bool, AppError>;

    /// Read a project inside the transaction; `NotFound` if absent.
    async fn get_project(&mut self, id: Uuid) -> Result<Project, AppError>;

    async fn delete_project(&mut self, id: Uuid) -> Result<(), AppError>;

    async fn insert_file(&mut self, file: &NewFile) -> Result<File, AppError>;

    /// Read a file inside the transaction; `NotFound` if absent.
    async fn get_file(&mut self, id: Uuid) -> Result<File, AppError>;

    async fn update_file_size(&mut self, id: Uuid, size: i64) -> Result<(), AppError>;

    async fn delete_file(&mut self, id: Uuid) -> Result<(), AppError>;

    /// Record a blob cleanup in the outbox as part of this transaction.
    async fn stage_cleanup(&mut self, cleanup: &PendingCompensation) -> Result<Uuid, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, AppError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError>;

    async fn list_projects_by_owner(&self, owner_id: Uuid) -> Result<Vec<Project>, AppError>;

    /// The committed project that owns `bucket`, if any.
    async fn find_project_by_bucket(&self, bucket: &str) -> Result<Option<Project>, AppError>;

    async fn get_file(&self, id: Uuid) -> Result<Option<File>, AppError>;

    async fn list_files_by_project(&self, project_id: Uuid) -> Result<Vec<File>, AppError>;

    async fn list_files_by_uploader(&self, user_id: Uuid) -> Result<Vec<File>, AppError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create(&self, key: &NewApiKey) -> Result<ApiKey, AppError>;

    /// Unrevoked keys sharing a lookup prefix.
    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>, AppError>;

    async fn get(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>, AppError>;

    async fn list_by_project(&self, project_id: Uuid, user_id: Uuid)
        -> Result<Vec<ApiKey>, AppError>;

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError>;

    /// Set `revoked_at` on an unrevoked key. Returns false when no row changed.
    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError>;

    /// Returns false when no row was deleted.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, cleanup: &PendingCompensation) -> Result<OutboxEntry, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, AppError>;

    /// Claim pending entries whose `next_attempt_at` has passed, oldest first.
    ///
    /// Claimed entries have `next_attempt_at` pushed out by [`CLAIM_LEASE_SECS`]
    /// so concurrent sweeps skip them. An entry whose claimant dies becomes due
    /// again once the lease runs out.
    ///
    /// [`CLAIM_LEASE_SECS`]: crate::db::outbox::CLAIM_LEASE_SECS
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError>;

    async fn mark_done(&self, id: Uuid) -> Result<(), AppError>;

    /// Bump `attempts`, store the error and reschedule. `park` marks the entry `failed`.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        park: bool,
    ) -> Result<(), AppError>;
}
