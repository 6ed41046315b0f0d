use crate::keys::validate_bucket_name;
use crate::traits::{
    BlobStore, BucketInfo, ObjectDownload, ObjectInfo, ObjectReader, StorageError, StorageResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use stash_core::constants::DEFAULT_CONTENT_TYPE;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

/// Parts are 5MB, the S3 minimum for every part but the last.
const PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 deletes at most 1000 keys per request.
const DELETE_BATCH: usize = 1000;

const DEFAULT_REGION: &str = "us-east-1";

/// S3 blob store. Buckets map 1:1 to S3 buckets.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    region: String,
}

impl S3BlobStore {
    /// Create a new S3BlobStore
    ///
    /// # Arguments
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO). Path-style addressing is used when set.
    pub async fn new(region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .endpoint_url(endpoint)
                .region(config.region().cloned())
                .retry_config(retry_config);
            if let Some(provider) = config.credentials_provider() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            // MinIO and most S3-compatible providers require path-style addressing
            s3_config_builder = s3_config_builder.force_path_style(true);

            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        Ok(S3BlobStore { client, region })
    }

    async fn list_object_keys(&self, bucket: &str) -> StorageResult<Option<Vec<String>>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let result = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(e) if e.code() == Some("NoSuchBucket") => return Ok(None),
                Err(e) => return Err(StorageError::BackendError(e.to_string())),
            };

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(Some(keys))
    }

    async fn delete_keys(&self, bucket: &str, keys: Vec<String>) -> StorageResult<()> {
        for chunk in keys.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| StorageError::BackendError(e.to_string()))
                })
                .collect::<StorageResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::BackendError(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn put_single(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<u64> {
        let size = data.len() as u64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(object_name)
            .body(ByteStream::from(Bytes::from(data)))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %object_name,
                    size_bytes = size,
                    "S3 upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;
        Ok(size)
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
    ) -> StorageResult<(u64, i32)> {
        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(object_name)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %object_name,
                    "Failed to create multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let upload_id = create_result
            .upload_id()
            .ok_or_else(|| StorageError::UploadFailed("No upload ID returned from S3".to_string()))?
            .to_string();

        let uploaded = self
            .upload_parts(bucket, object_name, &upload_id, first_part, reader)
            .await;

        match uploaded {
            Ok((parts, total_size)) => {
                let part_count = parts.len() as i32;
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(object_name)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %object_name,
                            "Failed to complete multipart upload"
                        );
                        StorageError::UploadFailed(e.to_string())
                    })?;
                Ok((total_size, part_count))
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(object_name)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        error = %abort_err,
                        bucket = %bucket,
                        key = %object_name,
                        "Failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        object_name: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total_size = 0u64;
        let mut part_number = 1i32;
        let mut next = Some(first_part);

        while let Some(data) = next.take() {
            if data.is_empty() {
                break;
            }
            let full = data.len() == PART_SIZE;
            total_size += data.len() as u64;

            let result = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(object_name)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::from(data)))
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %object_name,
                        part_number = part_number,
                        "Failed to upload part"
                    );
                    StorageError::UploadFailed(e.to_string())
                })?;

            let etag = result
                .e_tag()
                .ok_or_else(|| {
                    StorageError::UploadFailed(format!("No ETag returned for part {}", part_number))
                })?
                .to_string();
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
            part_number += 1;

            if full {
                next = Some(read_part(reader).await?);
            }
        }

        Ok((parts, total_size))
    }
}

/// Fill a buffer up to `PART_SIZE` bytes or EOF.
async fn read_part(reader: &mut ObjectReader) -> StorageResult<Vec<u8>> {
    let mut buffer = vec![0u8; PART_SIZE];
    let mut filled = 0usize;
    while filled < PART_SIZE {
        let n = reader
            .read(&mut buffer[filled..])
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read from stream: {}", e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        let start = std::time::Instant::now();

        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(|e| match &e {
            SdkError::ServiceError(service_err) => match service_err.err() {
                CreateBucketError::BucketAlreadyExists(_)
                | CreateBucketError::BucketAlreadyOwnedByYou(_) => {
                    StorageError::AlreadyExists(format!("bucket {}", bucket))
                }
                _ => {
                    tracing::error!(error = %e, bucket = %bucket, "S3 create bucket failed");
                    StorageError::BackendError(e.to_string())
                }
            },
            _ => {
                tracing::error!(error = %e, bucket = %bucket, "S3 create bucket failed");
                StorageError::BackendError(e.to_string())
            }
        })?;

        tracing::info!(
            bucket = %bucket,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 bucket created"
        );
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_bucket_name(bucket)?;
        let start = std::time::Instant::now();

        let Some(keys) = self.list_object_keys(bucket).await? else {
            return Ok(());
        };
        let purged = keys.len();
        self.delete_keys(bucket, keys).await?;

        match self.client.delete_bucket().bucket(bucket).send().await {
            Ok(_) => {}
            Err(e) if e.code() == Some("NoSuchBucket") => return Ok(()),
            Err(e) => {
                tracing::error!(error = %e, bucket = %bucket, "S3 delete bucket failed");
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %bucket,
            purged_objects = purged,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 bucket removed"
        );
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        validate_bucket_name(bucket)?;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    HeadBucketError::NotFound(_) => Ok(false),
                    _ => Err(StorageError::BackendError(e.to_string())),
                },
                _ => Err(StorageError::BackendError(e.to_string())),
            },
        }
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| {
                let name = b.name()?.to_string();
                let created_at = b.creation_date().and_then(|d| {
                    DateTime::<Utc>::from_timestamp(d.secs(), d.subsec_nanos())
                });
                Some(BucketInfo { name, created_at })
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
        let start = std::time::Instant::now();

        let first = read_part(&mut reader).await?;
        let (size, parts) = if first.len() < PART_SIZE {
            (
                self.put_single(bucket, object_name, content_type, first)
                    .await?,
                1,
            )
        } else {
            self.put_multipart(bucket, object_name, content_type, first, &mut reader)
                .await?
        };

        tracing::info!(
            bucket = %bucket,
            key = %object_name,
            size_bytes = size,
            parts = parts,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            name: object_name.to_string(),
            size,
        })
    }

    async fn get_object(&self, bucket: &str, object_name: &str) -> StorageResult<ObjectDownload> {
        let start = std::time::Instant::now();

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_name)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    GetObjectError::NoSuchKey(_) => {
                        StorageError::NotFound(format!("{}/{}", bucket, object_name))
                    }
                    _ => StorageError::DownloadFailed(e.to_string()),
                },
                _ => StorageError::DownloadFailed(e.to_string()),
            })?;

        let content_type = response
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let size = response.content_length().unwrap_or(0).max(0) as u64;

        let bucket_name = bucket.to_string();
        let key = object_name.to_string();
        let stream = ReaderStream::new(response.body.into_async_read()).map(move |item| {
            item.map_err(|e| {
                tracing::error!(
                    bucket = %bucket_name,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
                );
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(ObjectDownload {
            content_type,
            size,
            stream: Box::pin(stream),
        })
    }

    async fn remove_object(&self, bucket: &str, object_name: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(object_name)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.code() == Some("NoSuchBucket") => return Ok(()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %object_name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %bucket,
            key = %object_name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn object_exists(&self, bucket: &str, object_name: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(object_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    HeadObjectError::NotFound(_) => Ok(false),
                    _ => Err(StorageError::BackendError(e.to_string())),
                },
                _ => Err(StorageError::BackendError(e.to_string())),
            },
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
