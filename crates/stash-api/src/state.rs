use stash_core::Config;
use stash_db::{ApiKeyStore, MetadataStore, OutboxStore};
use stash_services::{
    ApiKeyService, AuthGateway, CatalogService, SagaCoordinator, SessionTokenService,
    SignedUrlService,
};
use stash_storage::BlobStore;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub metadata: Arc<dyn MetadataStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub saga: Arc<SagaCoordinator>,
    pub catalog: Arc<CatalogService>,
    pub api_keys: Arc<ApiKeyService>,
    pub signed_urls: Arc<SignedUrlService>,
    pub sessions: Arc<SessionTokenService>,
    pub gateway: Arc<AuthGateway>,
}

impl AppState {
    /// Wire the services over the given stores.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        api_key_store: Arc<dyn ApiKeyStore>,
        outbox: Arc<dyn OutboxStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let saga = Arc::new(SagaCoordinator::new(
            metadata.clone(),
            blobs.clone(),
            outbox.clone(),
        ));
        let catalog = Arc::new(CatalogService::new(metadata.clone(), blobs.clone()));
        let api_keys = Arc::new(ApiKeyService::new(
            api_key_store,
            metadata.clone(),
            config.api_key_prefix(),
        ));
        let signed_urls = Arc::new(SignedUrlService::new(
            config.jwt_secret(),
            config.base_url(),
            config
                .signed_url_max_ttl_secs()
                .map(chrono::Duration::seconds),
        ));
        let sessions = Arc::new(SessionTokenService::new(
            config.jwt_secret(),
            chrono::Duration::hours(config.session_ttl_hours()),
        ));
        let gateway = Arc::new(AuthGateway::new(api_keys.clone(), sessions.clone()));

        Self {
            config,
            metadata,
            outbox,
            blobs,
            saga,
            catalog,
            api_keys,
            signed_urls,
            sessions,
            gateway,
        }
    }
}
