//! Stash Storage Library
//!
//! Blob store abstraction and its backends. A project owns exactly one bucket;
//! every file is one object inside it.
//!
//! # Object name format
//!
//! Object names are `{bucket}-{uuid}-{filename}`. They are generated in the
//! `keys` module so every backend and the saga agree on the layout. Bucket names
//! follow S3 naming rules and are validated before any side effect.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_blob_store;
pub use keys::{generate_object_name, validate_bucket_name, validate_filename};
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{BlobFault, MemoryBlobStore};
#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;
pub use stash_core::StorageBackend;
pub use traits::{
    BlobStore, BucketInfo, ByteChunkStream, ObjectDownload, ObjectInfo, ObjectReader,
    StorageError, StorageResult,
};
