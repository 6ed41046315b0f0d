//! Stash Database Layer
//!
//! Postgres repositories for projects, files, API keys and the compensation
//! outbox, plus the transactional seam the saga coordinator drives.

pub mod db;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;

pub use db::store::{ApiKeyStore, MetadataStore, MetadataTx, OutboxStore};
pub use db::transaction::{PgMetadataStore, PgMetadataTx};
pub use db::{
    next_attempt_delay, ApiKeyRepository, FileRepository, OutboxRepository, ProjectRepository,
    CLAIM_LEASE_SECS,
};
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{MemoryMetadataStore, MetaFault};
