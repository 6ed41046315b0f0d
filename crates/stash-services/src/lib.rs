//! Stash Services
//!
//! Business logic sitting between the HTTP layer and the two stores: the saga
//! coordinator that keeps projects and files consistent with their buckets and
//! objects, the token services, the authorization gateway policy and the
//! reconciliation worker that drains the compensation outbox.

pub mod api_key;
pub mod catalog;
pub mod content_type;
pub mod gateway;
pub mod reconcile;
pub mod saga;
pub mod session;
pub mod signed_url;

pub use api_key::{ApiKeyService, IssuedApiKey};
pub use catalog::CatalogService;
pub use content_type::{sniff_content_type, sniff_reader};
pub use gateway::{project_segment, ApiKeyIdentity, AuthGateway, Credentials, Identity};
pub use reconcile::{ReconciliationConfig, ReconciliationWorker, Reconciler, SweepReport};
pub use saga::{SagaCoordinator, UploadRequest};
pub use session::{SessionClaims, SessionTokenService};
pub use signed_url::{SignedUrlClaims, SignedUrlService};
