//! Saga coordinator for operations spanning the metadata database and the blob store.
//!
//! There is no distributed transaction between the two stores, so every
//! composite operation is an ordered sequence of local steps:
//!
//! - **Create project / upload file** stage the row in an open transaction,
//!   perform the blob side effect, then commit. A blob failure only needs a
//!   rollback. A commit failure leaves an orphaned bucket or object behind, which
//!   is removed by a synchronous compensation. If that compensation fails too, the
//!   cleanup is handed to the outbox for the reconciliation worker.
//! - **Delete project / delete file** delete the row and stage the matching
//!   blob removal in the outbox inside one transaction, commit, and only then
//!   remove the blob. A failed removal stays in the outbox and is retried.
//!
//! Compensation and post-commit cleanup run on a spawned task that is awaited,
//! so a dropped request future cannot abandon cleanup midway. The primary error
//! is always what the caller sees.

use chrono::Utc;
use stash_core::models::{CompensationOp, File, NewFile, PendingCompensation, Project};
use stash_core::AppError;
use stash_db::{next_attempt_delay, MetadataStore, MetadataTx, OutboxStore};
use stash_storage::{
    generate_object_name, validate_bucket_name, validate_filename, BlobStore, ObjectReader,
    StorageResult,
};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, ReadBuf};
use uuid::Uuid;

use crate::content_type::sniff_reader;

/// Input of [`SagaCoordinator::upload_file`].
pub struct UploadRequest {
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub filename: String,
    /// Sniffed from the payload when absent.
    pub content_type: Option<String>,
    /// Size hint forwarded to the blob store.
    pub content_length: Option<u64>,
    pub reader: ObjectReader,
}

/// Identifies the saga a compensation belongs to, for logs.
#[derive(Debug, Clone, Copy)]
struct SagaRef {
    operation: &'static str,
    project_id: Uuid,
    file_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct SagaCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    outbox: Arc<dyn OutboxStore>,
}

impl SagaCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        outbox: Arc<dyn OutboxStore>,
    ) -> Self {
        Self {
            metadata,
            blobs,
            outbox,
        }
    }

    /// Create a project row and its bucket, or neither.
    #[tracing::instrument(skip(self), fields(saga = "create_project"))]
    pub async fn create_project(&self, owner_id: Uuid, bucket: &str) -> Result<Project, AppError> {
        validate_bucket_name(bucket)?;

        let mut tx = self.metadata.begin().await?;

        // An outstanding removal would take the new project's bucket with it.
        match tx.bucket_removal_pending(bucket).await {
            Ok(false) => {}
            Ok(true) => {
                rollback(tx, "create_project").await;
                return Err(AppError::Conflict(format!(
                    "bucket {} is still being removed, try again later",
                    bucket
                )));
            }
            Err(e) => {
                rollback(tx, "create_project").await;
                return Err(e);
            }
        }

        let project = match tx.insert_project(owner_id, bucket).await {
            Ok(project) => project,
            Err(e) => {
                rollback(tx, "create_project").await;
                return Err(e);
            }
        };

        if let Err(e) = self.blobs.create_bucket(bucket).await {
            tracing::warn!(
                bucket = %bucket,
                error = %e,
                "Bucket creation failed, rolling back project row"
            );
            rollback(tx, "create_project").await;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            let saga = SagaRef {
                operation: "create_project",
                project_id: project.id,
                file_id: None,
            };
            self.compensate(saga, PendingCompensation::remove_bucket(bucket))
                .await;
            return Err(e);
        }

        tracing::info!(
            project_id = %project.id,
            bucket = %project.bucket,
            "Project created"
        );
        Ok(project)
    }

    /// Stream a file into its project's bucket and record it.
    ///
    /// Only the project owner may upload. The stored size is the number of
    /// bytes actually streamed, whatever the length hint said.
    #[tracing::instrument(
        skip(self, request),
        fields(saga = "upload_file", project_id = %request.project_id, filename = %request.filename)
    )]
    pub async fn upload_file(&self, request: UploadRequest) -> Result<File, AppError> {
        let UploadRequest {
            project_id,
            uploaded_by,
            filename,
            content_type,
            content_length,
            reader,
        } = request;

        validate_filename(&filename)?;

        let (content_type, reader) = match content_type {
            Some(content_type) => (content_type, reader),
            None => sniff_reader(reader).await?,
        };

        let mut tx = self.metadata.begin().await?;

        let project = match tx.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                rollback(tx, "upload_file").await;
                return Err(e);
            }
        };
        if !project.is_owned_by(uploaded_by) {
            rollback(tx, "upload_file").await;
            return Err(AppError::Forbidden(
                "Only the project owner can upload files".to_string(),
            ));
        }

        let object_name = generate_object_name(&project.bucket, &filename);
        let new_file = NewFile {
            filename,
            object_name: object_name.clone(),
            project_id,
            size: content_length.map(|n| n as i64).unwrap_or(0),
            content_type: content_type.clone(),
            uploaded_by,
        };
        let file = match tx.insert_file(&new_file).await {
            Ok(file) => file,
            Err(e) => {
                rollback(tx, "upload_file").await;
                return Err(e);
            }
        };

        let counter = CountingReader::new(reader);
        let streamed = counter.counter();
        let started = Instant::now();
        let put = self
            .blobs
            .put_object(
                &project.bucket,
                &object_name,
                &content_type,
                content_length,
                Box::pin(counter),
            )
            .await;
        if let Err(e) = put {
            tracing::warn!(
                bucket = %project.bucket,
                key = %object_name,
                error = %e,
                "Object upload failed, rolling back file row"
            );
            rollback(tx, "upload_file").await;
            return Err(e.into());
        }

        let size = streamed.load(Ordering::Relaxed);
        tracing::debug!(
            bucket = %project.bucket,
            key = %object_name,
            size_bytes = size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Object stored"
        );

        let saga = SagaRef {
            operation: "upload_file",
            project_id,
            file_id: Some(file.id),
        };
        let cleanup = PendingCompensation::remove_object(&project.bucket, &object_name);

        if let Err(e) = tx.update_file_size(file.id, size as i64).await {
            rollback(tx, "upload_file").await;
            self.compensate(saga, cleanup).await;
            return Err(e);
        }

        if let Err(e) = tx.commit().await {
            self.compensate(saga, cleanup).await;
            return Err(e);
        }

        tracing::info!(
            file_id = %file.id,
            key = %object_name,
            size_bytes = size,
            "File uploaded"
        );
        Ok(File {
            size: size as i64,
            ..file
        })
    }

    /// Delete a project row, then its bucket. Only the owner may delete.
    #[tracing::instrument(skip(self), fields(saga = "delete_project"))]
    pub async fn delete_project(&self, project_id: Uuid, acting_user: Uuid) -> Result<Project, AppError> {
        let mut tx = self.metadata.begin().await?;

        let project = match tx.get_project(project_id).await {
            Ok(project) => project,
            Err(e) => {
                rollback(tx, "delete_project").await;
                return Err(e);
            }
        };
        if !project.is_owned_by(acting_user) {
            rollback(tx, "delete_project").await;
            return Err(AppError::Forbidden(
                "Only the project owner can delete the project".to_string(),
            ));
        }

        let cleanup = PendingCompensation::remove_bucket(&project.bucket);
        let staged = async {
            tx.delete_project(project_id).await?;
            let outbox_id = tx.stage_cleanup(&cleanup).await?;
            Ok::<_, AppError>(outbox_id)
        }
        .await;
        let outbox_id = match staged {
            Ok(id) => id,
            Err(e) => {
                rollback(tx, "delete_project").await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let saga = SagaRef {
            operation: "delete_project",
            project_id,
            file_id: None,
        };
        self.finish_cleanup(saga, outbox_id, cleanup).await;

        tracing::info!(project_id = %project_id, bucket = %project.bucket, "Project deleted");
        Ok(project)
    }

    /// Delete a file row, then its object. Only the uploader may delete.
    #[tracing::instrument(skip(self), fields(saga = "delete_file"))]
    pub async fn delete_file(&self, file_id: Uuid, acting_user: Uuid) -> Result<File, AppError> {
        let mut tx = self.metadata.begin().await?;

        let file = match tx.get_file(file_id).await {
            Ok(file) => file,
            Err(e) => {
                rollback(tx, "delete_file").await;
                return Err(e);
            }
        };
        if !file.is_uploaded_by(acting_user) {
            rollback(tx, "delete_file").await;
            return Err(AppError::Forbidden(
                "Only the uploader can delete this file".to_string(),
            ));
        }

        let cleanup = PendingCompensation::remove_object(&file.bucket, &file.object_name);
        let staged = async {
            tx.delete_file(file_id).await?;
            let outbox_id = tx.stage_cleanup(&cleanup).await?;
            Ok::<_, AppError>(outbox_id)
        }
        .await;
        let outbox_id = match staged {
            Ok(id) => id,
            Err(e) => {
                rollback(tx, "delete_file").await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let saga = SagaRef {
            operation: "delete_file",
            project_id: file.project_id,
            file_id: Some(file_id),
        };
        self.finish_cleanup(saga, outbox_id, cleanup).await;

        tracing::info!(file_id = %file_id, key = %file.object_name, "File deleted");
        Ok(file)
    }

    /// Undo a blob side effect after a failed commit. Falls back to the outbox.
    async fn compensate(&self, saga: SagaRef, cleanup: PendingCompensation) {
        let blobs = self.blobs.clone();
        let outbox = self.outbox.clone();

        let task = tokio::spawn(async move {
            match apply_cleanup(blobs.as_ref(), &cleanup).await {
                Ok(()) => {
                    tracing::info!(
                        operation = saga.operation,
                        bucket = %cleanup.bucket,
                        object = ?cleanup.object_name,
                        "Compensation applied"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        operation = saga.operation,
                        bucket = %cleanup.bucket,
                        object = ?cleanup.object_name,
                        project_id = %saga.project_id,
                        file_id = ?saga.file_id,
                        error = %e,
                        "Compensation failed"
                    );
                    if let Err(enqueue_err) = outbox.enqueue(&cleanup).await {
                        tracing::error!(
                            operation = saga.operation,
                            bucket = %cleanup.bucket,
                            object = ?cleanup.object_name,
                            error = %enqueue_err,
                            "Could not hand compensation to the outbox; manual cleanup required"
                        );
                    }
                }
            }
        });

        if let Err(e) = task.await {
            tracing::error!(operation = saga.operation, error = %e, "Compensation task aborted");
        }
    }

    /// Remove the blob of a committed delete and settle its outbox entry.
    async fn finish_cleanup(&self, saga: SagaRef, outbox_id: Uuid, cleanup: PendingCompensation) {
        let blobs = self.blobs.clone();
        let outbox = self.outbox.clone();

        let task = tokio::spawn(async move {
            let settled = match apply_cleanup(blobs.as_ref(), &cleanup).await {
                Ok(()) => outbox.mark_done(outbox_id).await,
                Err(e) => {
                    tracing::warn!(
                        operation = saga.operation,
                        bucket = %cleanup.bucket,
                        object = ?cleanup.object_name,
                        project_id = %saga.project_id,
                        file_id = ?saga.file_id,
                        outbox_id = %outbox_id,
                        error = %e,
                        "Blob removal failed after commit; left for reconciliation"
                    );
                    outbox
                        .record_failure(
                            outbox_id,
                            &e.to_string(),
                            Utc::now() + next_attempt_delay(0),
                            false,
                        )
                        .await
                }
            };
            if let Err(e) = settled {
                tracing::warn!(
                    outbox_id = %outbox_id,
                    error = %e,
                    "Could not update outbox entry; the worker will retry it"
                );
            }
        });

        if let Err(e) = task.await {
            tracing::error!(operation = saga.operation, error = %e, "Cleanup task aborted");
        }
    }
}

/// Run one blob cleanup. Removal is idempotent, so this is safe to repeat.
pub(crate) async fn apply_cleanup(
    blobs: &dyn BlobStore,
    cleanup: &PendingCompensation,
) -> StorageResult<()> {
    match (cleanup.operation, cleanup.object_name.as_deref()) {
        (CompensationOp::RemoveBucket, _) => blobs.remove_bucket(&cleanup.bucket).await,
        (CompensationOp::RemoveObject, Some(object)) => {
            blobs.remove_object(&cleanup.bucket, object).await
        }
        (CompensationOp::RemoveObject, None) => Err(stash_storage::StorageError::InvalidKey(
            "remove_object cleanup without an object name".to_string(),
        )),
    }
}

async fn rollback(tx: Box<dyn MetadataTx>, operation: &'static str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(operation, error = %e, "Transaction rollback failed");
    }
}

/// Counts the bytes handed to the blob store.
struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn counter(&self) -> Arc<AtomicU64> {
        self.count.clone()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            self.count.fetch_add(read, Ordering::Relaxed);
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::models::OutboxStatus;
    use stash_db::{MemoryMetadataStore, MetaFault};
    use stash_storage::{BlobFault, MemoryBlobStore};
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    struct Harness {
        meta: MemoryMetadataStore,
        blobs: MemoryBlobStore,
        saga: SagaCoordinator,
    }

    fn harness() -> Harness {
        let meta = MemoryMetadataStore::new();
        let blobs = MemoryBlobStore::new();
        let saga = SagaCoordinator::new(
            Arc::new(meta.clone()),
            Arc::new(blobs.clone()),
            Arc::new(meta.clone()),
        );
        Harness { meta, blobs, saga }
    }

    fn payload(data: &[u8]) -> ObjectReader {
        Box::pin(Cursor::new(data.to_vec()))
    }

    fn upload(project_id: Uuid, user: Uuid, filename: &str, data: &[u8]) -> UploadRequest {
        UploadRequest {
            project_id,
            uploaded_by: user,
            filename: filename.to_string(),
            content_type: None,
            content_length: Some(data.len() as u64),
            reader: payload(data),
        }
    }

    async fn project_with_bucket(h: &Harness, owner: Uuid, bucket: &str) -> Project {
        h.saga.create_project(owner, bucket).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_project_creates_row_and_bucket() {
        let h = harness();
        let owner = Uuid::new_v4();

        let project = h.saga.create_project(owner, "proj-abc").await.unwrap();

        assert_eq!(project.bucket, "proj-abc");
        assert_eq!(h.blobs.bucket_names(), vec!["proj-abc".to_string()]);
        assert_eq!(h.meta.projects().len(), 1);
    }

    #[tokio::test]
    async fn test_create_project_all_or_nothing_under_faults() {
        let meta_faults = [MetaFault::Begin, MetaFault::InsertProject, MetaFault::Commit];
        for fault in meta_faults {
            let h = harness();
            h.meta.fail_on(fault);

            let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;

            assert!(result.is_err(), "{:?} should fail the saga", fault);
            assert!(h.meta.projects().is_empty(), "row left after {:?}", fault);
            assert!(h.blobs.bucket_names().is_empty(), "bucket left after {:?}", fault);
        }

        let h = harness();
        h.blobs.fail_on(BlobFault::CreateBucket);
        let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(h.meta.projects().is_empty());
        assert!(h.blobs.bucket_names().is_empty());
    }

    #[tokio::test]
    async fn test_create_project_commit_and_compensation_failure_enqueues_cleanup() {
        let h = harness();
        h.meta.fail_on(MetaFault::Commit);
        h.blobs.fail_on(BlobFault::RemoveBucket);

        let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(h.meta.projects().is_empty());
        let entries = h.meta.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, CompensationOp::RemoveBucket);
        assert_eq!(entries[0].bucket, "proj-abc");
        assert_eq!(entries[0].status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_project_primary_error_survives_outbox_failure() {
        let h = harness();
        h.meta.fail_on(MetaFault::Commit);
        h.meta.fail_on(MetaFault::Outbox);
        h.blobs.fail_on(BlobFault::RemoveBucket);

        let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;

        match result {
            Err(AppError::Internal(msg)) => assert!(msg.contains("Commit")),
            other => panic!("expected the commit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_project_duplicate_bucket_is_conflict() {
        let h = harness();
        project_with_bucket(&h, Uuid::new_v4(), "proj-abc").await;

        let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(h.blobs.bucket_names(), vec!["proj-abc".to_string()]);
        assert_eq!(h.meta.projects().len(), 1);
    }

    #[tokio::test]
    async fn test_create_project_rejects_invalid_bucket_before_side_effects() {
        let h = harness();
        let result = h.saga.create_project(Uuid::new_v4(), "Bad_Bucket").await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert!(h.meta.projects().is_empty());
        assert!(h.blobs.bucket_names().is_empty());
    }

    #[tokio::test]
    async fn test_upload_file_stores_exactly_one_object() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        let data = b"%PDF-1.7\nreport body";

        let file = h
            .saga
            .upload_file(upload(project.id, owner, "report.pdf", data))
            .await
            .unwrap();

        assert_eq!(file.content_type, "application/pdf");
        assert_eq!(file.size, data.len() as i64);
        assert_eq!(file.bucket, "proj-abc");

        let objects = h.blobs.object_names("proj-abc");
        assert_eq!(objects, vec![file.object_name.clone()]);
        let rest = file
            .object_name
            .strip_prefix("proj-abc-")
            .and_then(|s| s.strip_suffix("-report.pdf"))
            .unwrap();
        assert!(Uuid::parse_str(rest).is_ok());

        let stored = h.meta.files();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].size, data.len() as i64);
    }

    #[tokio::test]
    async fn test_upload_file_size_counts_streamed_bytes() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;

        let mut request = upload(project.id, owner, "notes.txt", b"twelve bytes");
        request.content_length = None;
        let file = h.saga.upload_file(request).await.unwrap();

        assert_eq!(file.size, 12);
        assert_eq!(h.meta.files()[0].size, 12);
    }

    #[tokio::test]
    async fn test_upload_file_unknown_project_is_not_found() {
        let h = harness();
        let result = h
            .saga
            .upload_file(upload(Uuid::new_v4(), Uuid::new_v4(), "a.txt", b"a"))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(h.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_file_requires_project_owner() {
        let h = harness();
        let project = project_with_bucket(&h, Uuid::new_v4(), "proj-abc").await;

        let result = h
            .saga
            .upload_file(upload(project.id, Uuid::new_v4(), "a.txt", b"a"))
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert!(h.meta.files().is_empty());
        assert_eq!(h.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_file_rejects_bad_filename() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;

        let result = h
            .saga
            .upload_file(upload(project.id, owner, "../etc/passwd", b"a"))
            .await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(h.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_file_no_half_state_under_faults() {
        let meta_faults = [
            MetaFault::Begin,
            MetaFault::InsertFile,
            MetaFault::UpdateFileSize,
            MetaFault::Commit,
        ];
        for fault in meta_faults {
            let h = harness();
            let owner = Uuid::new_v4();
            let project = project_with_bucket(&h, owner, "proj-abc").await;
            h.meta.fail_on(fault);

            let result = h
                .saga
                .upload_file(upload(project.id, owner, "report.pdf", b"%PDF-1.7"))
                .await;

            assert!(result.is_err(), "{:?} should fail the upload", fault);
            assert!(h.meta.files().is_empty(), "row left after {:?}", fault);
            assert_eq!(h.blobs.object_count(), 0, "object left after {:?}", fault);
        }

        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.blobs.fail_on(BlobFault::PutObject);
        let result = h
            .saga
            .upload_file(upload(project.id, owner, "report.pdf", b"%PDF-1.7"))
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(h.meta.files().is_empty());
        assert_eq!(h.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_commit_failure_removes_object_and_surfaces_error() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.meta.fail_on(MetaFault::Commit);

        let result = h
            .saga
            .upload_file(upload(project.id, owner, "report.pdf", b"%PDF-1.7"))
            .await;

        assert!(result.is_err());
        assert!(h.blobs.object_names("proj-abc").is_empty());
        assert!(h.meta.outbox_entries().is_empty());
    }

    #[tokio::test]
    async fn test_upload_commit_and_compensation_failure_enqueues_object_cleanup() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.meta.fail_on(MetaFault::Commit);
        h.blobs.fail_on(BlobFault::RemoveObject);

        let result = h
            .saga
            .upload_file(upload(project.id, owner, "report.pdf", b"%PDF-1.7"))
            .await;

        assert!(result.is_err());
        let entries = h.meta.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, CompensationOp::RemoveObject);
        let leftover = h.blobs.object_names("proj-abc");
        assert_eq!(entries[0].object_name.as_deref(), leftover.first().map(String::as_str));
    }

    #[tokio::test]
    async fn test_delete_project_removes_row_bucket_and_files() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.saga
            .upload_file(upload(project.id, owner, "a.txt", b"a"))
            .await
            .unwrap();

        h.saga.delete_project(project.id, owner).await.unwrap();

        assert!(h.meta.projects().is_empty());
        assert!(h.meta.files().is_empty());
        assert!(h.blobs.bucket_names().is_empty());
        let entries = h.meta.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutboxStatus::Done);
    }

    #[tokio::test]
    async fn test_delete_project_requires_owner() {
        let h = harness();
        let project = project_with_bucket(&h, Uuid::new_v4(), "proj-abc").await;

        let result = h.saga.delete_project(project.id, Uuid::new_v4()).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(h.meta.projects().len(), 1);
        assert_eq!(h.blobs.bucket_names().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_project_missing_is_not_found() {
        let h = harness();
        let result = h.saga.delete_project(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_project_commit_failure_keeps_everything() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.meta.fail_on(MetaFault::Commit);

        let result = h.saga.delete_project(project.id, owner).await;

        assert!(result.is_err());
        assert_eq!(h.meta.projects().len(), 1);
        assert_eq!(h.blobs.bucket_names(), vec!["proj-abc".to_string()]);
        assert!(h.meta.outbox_entries().is_empty());
    }

    #[tokio::test]
    async fn test_delete_project_stage_failure_rolls_back() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.meta.fail_on(MetaFault::StageCleanup);

        let result = h.saga.delete_project(project.id, owner).await;

        assert!(result.is_err());
        assert_eq!(h.meta.projects().len(), 1);
        assert_eq!(h.blobs.bucket_names().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_project_blob_failure_still_succeeds_and_stays_pending() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.blobs.fail_on(BlobFault::RemoveBucket);

        h.saga.delete_project(project.id, owner).await.unwrap();

        assert!(h.meta.projects().is_empty());
        assert_eq!(h.blobs.bucket_names(), vec!["proj-abc".to_string()]);
        let entries = h.meta.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutboxStatus::Pending);
        assert_eq!(entries[0].attempts, 1);
        assert!(entries[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_create_project_refuses_bucket_with_pending_removal() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        h.blobs.fail_on(BlobFault::RemoveBucket);
        h.saga.delete_project(project.id, owner).await.unwrap();
        h.blobs.clear_faults();

        let result = h.saga.create_project(Uuid::new_v4(), "proj-abc").await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(h.meta.projects().is_empty());

        let entry_id = h.meta.outbox_entries()[0].id;
        OutboxStore::mark_done(&h.meta, entry_id).await.unwrap();
        h.blobs.remove_bucket("proj-abc").await.unwrap();
        let reused = h.saga.create_project(Uuid::new_v4(), "proj-abc").await.unwrap();
        assert_eq!(reused.bucket, "proj-abc");
    }

    #[tokio::test]
    async fn test_delete_file_removes_row_and_object() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        let file = h
            .saga
            .upload_file(upload(project.id, owner, "a.txt", b"a"))
            .await
            .unwrap();

        let deleted = h.saga.delete_file(file.id, owner).await.unwrap();

        assert_eq!(deleted.id, file.id);
        assert!(h.meta.files().is_empty());
        assert!(h.blobs.object_names("proj-abc").is_empty());
        assert_eq!(h.blobs.bucket_names().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_file_requires_uploader() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        let file = h
            .saga
            .upload_file(upload(project.id, owner, "a.txt", b"a"))
            .await
            .unwrap();

        let result = h.saga.delete_file(file.id, Uuid::new_v4()).await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(h.meta.files().len(), 1);
        assert_eq!(h.blobs.object_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_file_commit_failure_keeps_object() {
        let h = harness();
        let owner = Uuid::new_v4();
        let project = project_with_bucket(&h, owner, "proj-abc").await;
        let file = h
            .saga
            .upload_file(upload(project.id, owner, "a.txt", b"a"))
            .await
            .unwrap();
        h.meta.fail_on(MetaFault::Commit);

        let result = h.saga.delete_file(file.id, owner).await;

        assert!(result.is_err());
        assert_eq!(h.meta.files().len(), 1);
        assert_eq!(h.blobs.object_count(), 1);
    }

    #[tokio::test]
    async fn test_counting_reader_counts_all_bytes() {
        let data = vec![7u8; 10_000];
        let mut reader = CountingReader::new(Cursor::new(data));
        let counter = reader.counter();

        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 10_000);
    }
}
