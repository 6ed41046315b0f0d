pub mod api_keys;
pub mod files;
pub mod health;
pub mod projects;

use serde::Serialize;
use uuid::Uuid;

/// Body returned by delete and revoke endpoints.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub id: Uuid,
}
