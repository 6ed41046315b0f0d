use anyhow::Context;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use stash_core::models::{CompensationOp, OutboxEntry};
use stash_db::{next_attempt_delay, MetadataStore, OutboxStore};
use stash_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use uuid::Uuid;

use crate::saga::apply_cleanup;

/// Configuration for the outbox reconciliation worker
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub interval_seconds: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub max_concurrent: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            batch_size: 50,
            max_attempts: 10,
            max_concurrent: 8,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub parked: usize,
    /// Bucket removals dropped because a live project owns the bucket again.
    pub superseded: usize,
}

enum EntryOutcome {
    Done,
    Superseded,
    Rescheduled,
    Parked,
    /// The entry's own bookkeeping failed; it stays due.
    Untouched,
}

/// Executes due outbox entries against the blob store.
#[derive(Clone)]
pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    outbox: Arc<dyn OutboxStore>,
    blobs: Arc<dyn BlobStore>,
    config: ReconciliationConfig,
}

impl Reconciler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        outbox: Arc<dyn OutboxStore>,
        blobs: Arc<dyn BlobStore>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            metadata,
            outbox,
            blobs,
            config,
        }
    }

    /// Run one sweep over the due entries.
    pub async fn run_once(&self) -> anyhow::Result<SweepReport> {
        let now = Utc::now();
        let due = self
            .outbox
            .fetch_due(now, self.config.batch_size)
            .await
            .context("Failed to fetch due outbox entries")?;

        let mut report = SweepReport {
            attempted: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        tracing::info!(entry_count = due.len(), "Reconciling compensation outbox");

        let outcomes: Vec<EntryOutcome> = stream::iter(due)
            .map(|entry| self.process_entry(entry))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                EntryOutcome::Done => report.succeeded += 1,
                EntryOutcome::Superseded => report.superseded += 1,
                EntryOutcome::Rescheduled => report.rescheduled += 1,
                EntryOutcome::Parked => report.parked += 1,
                EntryOutcome::Untouched => {}
            }
        }
        Ok(report)
    }

    async fn process_entry(&self, entry: OutboxEntry) -> EntryOutcome {
        let cleanup = entry.compensation();

        if cleanup.operation == CompensationOp::RemoveBucket {
            match self.metadata.find_project_by_bucket(&cleanup.bucket).await {
                Ok(None) => {}
                Ok(Some(project)) => return self.supersede(&entry, project.id).await,
                Err(e) => {
                    tracing::error!(
                        outbox_id = %entry.id,
                        bucket = %entry.bucket,
                        error = %e,
                        "Failed to look up bucket owner; leaving entry for a later sweep"
                    );
                    return EntryOutcome::Untouched;
                }
            }
        }

        match apply_cleanup(self.blobs.as_ref(), &cleanup).await {
            Ok(()) => match self.outbox.mark_done(entry.id).await {
                Ok(()) => {
                    tracing::debug!(outbox_id = %entry.id, bucket = %entry.bucket, "Outbox entry reconciled");
                    EntryOutcome::Done
                }
                Err(e) => {
                    tracing::error!(outbox_id = %entry.id, error = %e, "Failed to mark outbox entry done");
                    EntryOutcome::Untouched
                }
            },
            Err(e) => {
                let attempts = entry.attempts + 1;
                let park = attempts >= self.config.max_attempts;
                let next_attempt_at = Utc::now() + next_attempt_delay(entry.attempts);

                if park {
                    tracing::error!(
                        outbox_id = %entry.id,
                        operation = %entry.operation,
                        bucket = %entry.bucket,
                        object = ?entry.object_name,
                        attempts,
                        error = %e,
                        "Compensation out of attempts; manual reconciliation required"
                    );
                } else {
                    tracing::warn!(
                        outbox_id = %entry.id,
                        operation = %entry.operation,
                        bucket = %entry.bucket,
                        attempts,
                        error = %e,
                        "Compensation retry failed"
                    );
                }

                match self
                    .outbox
                    .record_failure(entry.id, &e.to_string(), next_attempt_at, park)
                    .await
                {
                    Ok(()) if park => EntryOutcome::Parked,
                    Ok(()) => EntryOutcome::Rescheduled,
                    Err(record_err) => {
                        tracing::error!(outbox_id = %entry.id, error = %record_err, "Failed to record outbox failure");
                        EntryOutcome::Untouched
                    }
                }
            }
        }
    }
}

impl Reconciler {
    /// Settle a bucket removal without touching the bucket, which a live project owns.
    async fn supersede(&self, entry: &OutboxEntry, project_id: Uuid) -> EntryOutcome {
        tracing::warn!(
            outbox_id = %entry.id,
            bucket = %entry.bucket,
            project_id = %project_id,
            "Bucket belongs to a live project; dropping stale removal"
        );
        match self.outbox.mark_done(entry.id).await {
            Ok(()) => EntryOutcome::Superseded,
            Err(e) => {
                tracing::error!(outbox_id = %entry.id, error = %e, "Failed to mark outbox entry done");
                EntryOutcome::Untouched
            }
        }
    }
}

/// Background task sweeping the outbox on a fixed interval
pub struct ReconciliationWorker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReconciliationWorker {
    pub fn spawn(reconciler: Reconciler) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::worker_loop(reconciler, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    async fn worker_loop(reconciler: Reconciler, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = Duration::from_secs(reconciler.config.interval_seconds.max(1));
        let mut ticker = interval(period);

        tracing::info!(
            interval_seconds = reconciler.config.interval_seconds,
            batch_size = reconciler.config.batch_size,
            max_attempts = reconciler.config.max_attempts,
            "Reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reconciler.run_once().await {
                        Ok(report) if report.attempted > 0 => {
                            tracing::info!(
                                succeeded = report.succeeded,
                                rescheduled = report.rescheduled,
                                parked = report.parked,
                                superseded = report.superseded,
                                "Reconciliation sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Reconciliation worker shutting down");
                    break;
                }
            }
        }
    }

    /// Stop the worker and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            tracing::warn!(error = %e, "Failed to send shutdown signal to reconciliation worker");
        }
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Reconciliation worker ended abnormally");
        }
    }
}
