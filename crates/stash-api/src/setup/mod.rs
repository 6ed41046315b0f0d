//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod storage;

use crate::state::AppState;
use anyhow::Result;
use stash_core::Config;
use stash_db::{ApiKeyRepository, OutboxRepository, PgMetadataStore};
use stash_services::{ReconciliationConfig, ReconciliationWorker, Reconciler};
use std::sync::Arc;

/// Everything `main` needs to run and later stop the service.
pub struct App {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub reconciliation: Option<ReconciliationWorker>,
}

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<App> {
    crate::telemetry::init_telemetry()?;

    tracing::info!(
        environment = %config.environment(),
        "Configuration loaded and validated successfully"
    );

    let pool = database::setup_database(&config).await?;
    let blobs = storage::setup_storage(&config).await?;

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(PgMetadataStore::new(pool.clone())),
        Arc::new(ApiKeyRepository::new(pool.clone())),
        Arc::new(OutboxRepository::new(pool)),
        blobs,
    ));

    let reconciliation = spawn_reconciliation(&config, &state);
    let router = routes::setup_routes(&config, state.clone());

    Ok(App {
        state,
        router,
        reconciliation,
    })
}

/// Start the outbox worker unless `RECONCILE_INTERVAL_SECS` is 0
pub fn spawn_reconciliation(config: &Config, state: &AppState) -> Option<ReconciliationWorker> {
    if config.reconcile_interval_secs() == 0 {
        tracing::info!("Reconciliation worker disabled");
        return None;
    }

    let reconciler = Reconciler::new(
        state.metadata.clone(),
        state.outbox.clone(),
        state.blobs.clone(),
        ReconciliationConfig {
            interval_seconds: config.reconcile_interval_secs(),
            batch_size: config.reconcile_batch_size(),
            max_attempts: config.reconcile_max_attempts(),
            ..ReconciliationConfig::default()
        },
    );
    Some(ReconciliationWorker::spawn(reconciler))
}
