use super::store::OutboxStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use stash_core::{
    models::{OutboxEntry, PendingCompensation},
    AppError,
};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// Outbox row as stored; enums are TEXT columns.
#[derive(Debug, FromRow)]
struct OutboxRow {
    id: Uuid,
    operation: String,
    bucket: String,
    object_name: Option<String>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = AppError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            id: row.id,
            operation: row.operation.parse()?,
            bucket: row.bucket,
            object_name: row.object_name,
            status: row.status.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// How long a claimed entry stays invisible to other sweeps.
pub const CLAIM_LEASE_SECS: i64 = 300;

/// Delay before the next attempt after `attempts` failures: 5s doubling, capped at 1h.
pub fn next_attempt_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 20) as u32;
    let secs = 5i64.saturating_mul(1i64 << exponent);
    Duration::seconds(secs.min(3600))
}

pub(crate) async fn insert<'e, E>(exec: E, cleanup: &PendingCompensation) -> Result<Uuid, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<Postgres, Uuid>(
        r#"
        INSERT INTO compensation_outbox (operation, bucket, object_name)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(cleanup.operation.to_string())
    .bind(&cleanup.bucket)
    .bind(&cleanup.object_name)
    .fetch_one(exec)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, bucket = %cleanup.bucket, "Failed to stage outbox entry");
        AppError::Database(e)
    })
}

pub(crate) async fn bucket_removal_pending<'e, E>(exec: E, bucket: &str) -> Result<bool, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<Postgres, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM compensation_outbox
            WHERE bucket = $1 AND operation = 'remove_bucket' AND status = 'pending'
        )
        "#,
    )
    .bind(bucket)
    .fetch_one(exec)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, bucket = %bucket, "Failed to check pending bucket removal");
        AppError::Database(e)
    })
}

#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "insert"))]
    async fn enqueue(&self, cleanup: &PendingCompensation) -> Result<OutboxEntry, AppError> {
        let id = insert(&self.pool, cleanup).await?;
        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal("outbox entry vanished after insert".to_string()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "select"))]
    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, AppError> {
        let row = sqlx::query_as::<Postgres, OutboxRow>(
            "SELECT * FROM compensation_outbox WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %id, "Failed to get outbox entry");
            AppError::Database(e)
        })?;

        row.map(OutboxEntry::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "update"))]
    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError> {
        let rows = sqlx::query_as::<Postgres, OutboxRow>(
            r#"
            UPDATE compensation_outbox
            SET next_attempt_at = $1 + make_interval(secs => $3), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM compensation_outbox
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(CLAIM_LEASE_SECS as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to claim due outbox entries");
            AppError::Database(e)
        })?;

        // RETURNING carries no order; restore oldest-first.
        let mut entries = rows
            .into_iter()
            .map(OutboxEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    #[tracing::instrument(skip(self), fields(db.table = "compensation_outbox", db.operation = "update"))]
    async fn mark_done(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE compensation_outbox
            SET status = 'done', last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %id, "Failed to mark outbox entry done");
            AppError::Database(e)
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "compensation_outbox", db.operation = "update"))]
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        park: bool,
    ) -> Result<(), AppError> {
        let status = if park { "failed" } else { "pending" };
        sqlx::query(
            r#"
            UPDATE compensation_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                next_attempt_at = $3,
                status = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, id = %id, "Failed to record outbox failure");
            AppError::Database(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_delay_doubles() {
        assert_eq!(next_attempt_delay(0).num_seconds(), 5);
        assert_eq!(next_attempt_delay(1).num_seconds(), 10);
        assert_eq!(next_attempt_delay(4).num_seconds(), 80);
    }

    #[test]
    fn test_next_attempt_delay_capped_at_one_hour() {
        assert_eq!(next_attempt_delay(10).num_seconds(), 3600);
        assert_eq!(next_attempt_delay(i32::MAX).num_seconds(), 3600);
        assert_eq!(next_attempt_delay(-3).num_seconds(), 5);
    }
}
