//! In-memory blob store with fault injection, for saga and HTTP tests.

use crate::keys::validate_bucket_name;
use crate::traits::{
    BlobStore, BucketInfo, ObjectDownload, ObjectInfo, ObjectReader, StorageError, StorageResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobFault {
    CreateBucket,
    RemoveBucket,
    PutObject,
    GetObject,
    RemoveObject,
}

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    data: Bytes,
}

#[derive(Debug)]
struct StoredBucket {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<String, StoredBucket>,
    faults: HashSet<BlobFault>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later call of `op` fail until cleared.
    pub fn fail_on(&self, op: BlobFault) {
        self.lock().faults.insert(op);
    }

    pub fn clear_fault(&self, op: BlobFault) {
        self.lock().faults.remove(&op);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.lock().buckets.keys().cloned().collect()
    }

    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object_count(&self) -> usize {
        self.lock().buckets.values().map(|b| b.objects.len()).sum()
    }

    fn check(&self, op: BlobFault) -> StorageResult<()> {
        if self.lock().faults.contains(&op) {
            return Err(StorageError::BackendError(format!(
                "injected failure: {:?}",
                op
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        self.check(BlobFault::CreateBucket)?;
        let mut inner = self.lock();
        if inner.buckets.contains_key(bucket) {
            return Err(StorageError::AlreadyExists(format!("bucket {}", bucket)));
        }
        inner.buckets.insert(
            bucket.to_string(),
            StoredBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.check(BlobFault::RemoveBucket)?;
        self.lock().buckets.remove(bucket);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.lock().buckets.contains_key(bucket))
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        Ok(self
            .lock()
            .buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                created_at: Some(b.created_at),
            })
            .collect())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        _content_length: Option<u64>,
        mut reader: ObjectReader,
    ) -> StorageResult<ObjectInfo> {
        self.check(BlobFault::PutObject)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let size = data.len() as u64;

        let mut inner = self.lock();
        let stored = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NotFound(format!("bucket {}", bucket)))?;
        stored.objects.insert(
            object_name.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                data: Bytes::from(data),
            },
        );

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            name: object_name.to_string(),
            size,
        })
    }

    async fn get_object(&self, bucket: &str, object_name: &str) -> StorageResult<ObjectDownload> {
        self.check(BlobFault::GetObject)?;
        let object = self
            .lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(object_name).cloned())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, object_name)))?;

        let size = object.data.len() as u64;
        let stream = futures::stream::iter(vec![Ok::<_, StorageError>(object.data)]);
        Ok(ObjectDownload {
            content_type: object.content_type,
            size,
            stream: Box::pin(stream),
        })
    }

    async fn remove_object(&self, bucket: &str, object_name: &str) -> StorageResult<()> {
        self.check(BlobFault::RemoveObject)?;
        if let Some(b) = self.lock().buckets.get_mut(bucket) {
            b.objects.remove(object_name);
        }
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, object_name: &str) -> StorageResult<bool> {
        Ok(self
            .lock()
            .buckets
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(object_name)))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_fault_then_cleared() {
        let store = MemoryBlobStore::new();
        store.fail_on(BlobFault::CreateBucket);
        assert!(store.create_bucket("proj-abc").await.is_err());
        assert!(store.bucket_names().is_empty());

        store.clear_fault(BlobFault::CreateBucket);
        store.create_bucket("proj-abc").await.unwrap();
        assert_eq!(store.bucket_names(), vec!["proj-abc".to_string()]);
    }
}
