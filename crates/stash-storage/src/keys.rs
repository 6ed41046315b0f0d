//! Bucket and object naming.
//!
//! Object name format: `{bucket}-{uuid}-{filename}`.

use crate::{StorageError, StorageResult};
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("bucket name pattern compiles")
});

static IPV4_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("ipv4 pattern compiles")
});

/// Maximum filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Validate a bucket name against S3 naming rules.
pub fn validate_bucket_name(bucket: &str) -> StorageResult<()> {
    if !BUCKET_NAME.is_match(bucket) {
        return Err(StorageError::InvalidKey(format!(
            "bucket name '{}' must be 3-63 lowercase letters, digits, '-' or '.', starting and ending with a letter or digit",
            bucket
        )));
    }
    if bucket.contains("..") || IPV4_LIKE.is_match(bucket) {
        return Err(StorageError::InvalidKey(format!(
            "bucket name '{}' is not allowed",
            bucket
        )));
    }
    Ok(())
}

/// Validate a user-supplied filename before it becomes part of an object name.
pub fn validate_filename(filename: &str) -> StorageResult<()> {
    if filename.is_empty() {
        return Err(StorageError::InvalidKey("filename is empty".to_string()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(StorageError::InvalidKey(format!(
            "filename exceeds {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if filename.contains(['/', '\\', '\0']) || filename.contains("..") {
        return Err(StorageError::InvalidKey(
            "filename contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Generate the object name for a new upload.
pub fn generate_object_name(bucket: &str, filename: &str) -> String {
    format!("{}-{}-{}", bucket, Uuid::new_v4(), filename)
}

/// Reject object names that could escape a bucket on path-based backends.
pub(crate) fn check_object_name(object_name: &str) -> StorageResult<()> {
    if object_name.is_empty()
        || object_name.contains("..")
        || object_name.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidKey(format!(
            "object name '{}' is not allowed",
            object_name
        )));
    }
    Ok(())
}
