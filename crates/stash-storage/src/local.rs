use crate::keys::{check_object_name, validate_bucket_name};
use crate::traits::{
    BlobStore, BucketInfo, ObjectDownload, ObjectInfo, ObjectReader, StorageError, StorageResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use stash_core::constants::DEFAULT_CONTENT_TYPE;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const META_DIR: &str = ".meta";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
}

/// Local filesystem blob store. Each bucket is a directory under `base_path`.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore rooted at `base_path` (e.g. "./data/blobs")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalBlobStore { base_path })
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_bucket_name(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    /// Path of an object and of its content-type sidecar.
    fn object_paths(&self, bucket: &str, object_name: &str) -> StorageResult<(PathBuf, PathBuf)> {
        check_object_name(object_name)?;
        let bucket_path = self.bucket_path(bucket)?;
        let object = bucket_path.join(object_name);
        let meta = bucket_path
            .join(META_DIR)
            .join(format!("{}.json", object_name));
        Ok((object, meta))
    }

    async fn require_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.bucket_path(bucket)?;

        match fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(format!("bucket {}", bucket)));
            }
            Err(e) => {
                return Err(StorageError::BackendError(format!(
                    "Failed to create bucket directory {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        fs::create_dir_all(path.join(META_DIR)).await?;

        tracing::info!(bucket = %bucket, path = %path.display(), "Local bucket created");
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.bucket_path(bucket)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_dir_all(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to remove bucket directory {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(
            bucket = %bucket,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local bucket removed"
        );
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let path = self.bucket_path(bucket)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut buckets = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_bucket_name(&name).is_err() {
                continue;
            }
            let created_at = meta
                .created()
                .or_else(|_| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            buckets.push(BucketInfo { name, created_at });
        }

        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        _content_length: Option<u64>,
        mut reader: ObjectReader,
    ) -> StorageResult<ObjectInfo> {
        let (path, meta_path) = self.object_paths(bucket, object_name)?;
        self.require_bucket(bucket).await?;
        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let bytes_copied = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        let meta = serde_json::to_vec(&ObjectMeta {
            content_type: content_type.to_string(),
        })
        .map_err(|e| StorageError::BackendError(e.to_string()))?;
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut meta_file = fs::File::create(&meta_path).await?;
        meta_file.write_all(&meta).await?;

        tracing::info!(
            bucket = %bucket,
            key = %object_name,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            name: object_name.to_string(),
            size: bytes_copied,
        })
    }

    async fn get_object(&self, bucket: &str, object_name: &str) -> StorageResult<ObjectDownload> {
        let (path, meta_path) = self.object_paths(bucket, object_name)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, object_name)));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;
        let size = file.metadata().await?.len();

        let content_type = match fs::read(&meta_path).await {
            Ok(raw) => serde_json::from_slice::<ObjectMeta>(&raw)
                .map(|m| m.content_type)
                .unwrap_or_else(|_| DEFAULT_CONTENT_TYPE.to_string()),
            Err(_) => DEFAULT_CONTENT_TYPE.to_string(),
        };

        let key = object_name.to_string();
        let bucket_name = bucket.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(
                    bucket = %bucket_name,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream download error"
                );
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(ObjectDownload {
            content_type,
            size,
            stream: Box::pin(stream),
        })
    }

    async fn remove_object(&self, bucket: &str, object_name: &str) -> StorageResult<()> {
        let (path, meta_path) = self.object_paths(bucket, object_name)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;
        let _ = fs::remove_file(&meta_path).await;

        tracing::info!(
            bucket = %bucket,
            key = %object_name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn object_exists(&self, bucket: &str, object_name: &str) -> StorageResult<bool> {
        let (path, _) = self.object_paths(bucket, object_name)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
