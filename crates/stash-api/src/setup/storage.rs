use anyhow::{Context, Result};
use stash_core::Config;
use stash_storage::{create_blob_store, BlobStore};
use std::sync::Arc;

/// Build the configured blob store backend
pub async fn setup_storage(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let store = create_blob_store(config)
        .await
        .with_context(|| format!("Failed to initialize {} blob store", config.storage_backend()))?;
    tracing::info!(backend = %config.storage_backend(), "Blob store ready");
    Ok(store)
}
