//! Blob store abstraction trait
//!
//! The blob store has no transactions and no rollback. Removal operations are
//! idempotent so that compensations and the reconciliation worker can retry them.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid bucket or object name: {0}")]
    InvalidKey(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for stash_core::AppError {
    fn from(err: StorageError) -> Self {
        use stash_core::AppError;
        match err {
            StorageError::NotFound(msg) => AppError::NotFound(msg),
            StorageError::AlreadyExists(msg) => AppError::Conflict(msg),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Payload source for uploads.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Chunked object body for downloads.
pub type ByteChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub size: u64,
}

pub struct ObjectDownload {
    pub content_type: String,
    pub size: u64,
    pub stream: ByteChunkStream,
}

impl std::fmt::Debug for ObjectDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDownload")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Blob store abstraction
///
/// All backends (S3, local filesystem, in-memory) implement this trait. The saga
/// coordinator only ever talks to a `dyn BlobStore`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create a bucket. Fails with `AlreadyExists` if it is already present.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Remove a bucket and any objects still inside it. A missing bucket is not an error.
    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    /// Stream an object into a bucket
    ///
    /// The reader is consumed until EOF. `content_length` is a hint; the returned
    /// `ObjectInfo::size` is the number of bytes actually stored.
    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: ObjectReader,
    ) -> StorageResult<ObjectInfo>;

    /// Open an object for streaming download
    async fn get_object(&self, bucket: &str, object_name: &str) -> StorageResult<ObjectDownload>;

    /// Remove an object. A missing object is not an error.
    async fn remove_object(&self, bucket: &str, object_name: &str) -> StorageResult<()>;

    async fn object_exists(&self, bucket: &str, object_name: &str) -> StorageResult<bool>;

    fn backend_type(&self) -> StorageBackend;
}
