//! Database repositories for the data access layer
//!
//! Each repository owns the SQL for one table. Statements that must run inside a
//! saga transaction are exposed as executor-generic functions so the same SQL is
//! used by `PgMetadataTx` and by the pool-backed read paths.

pub mod api_key;
pub mod file;
pub mod outbox;
pub mod project;
pub mod store;
pub mod transaction;

pub use api_key::ApiKeyRepository;
pub use file::FileRepository;
pub use outbox::{next_attempt_delay, OutboxRepository, CLAIM_LEASE_SECS};
pub use project::ProjectRepository;

use stash_core::AppError;

/// Map a sqlx error into the domain taxonomy, logging the failure.
pub(crate) fn map_db_error(err: sqlx::Error, conflict: &str, context: &str) -> AppError {
    match err {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("{} not found", conflict)),
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(format!("{} already exists", conflict))
        }
        other => {
            tracing::error!(error = %other, "{}", context);
            AppError::Database(other)
        }
    }
}
