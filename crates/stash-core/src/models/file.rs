use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// File metadata. The object itself lives in the project's bucket under `object_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct File {
    pub id: Uuid,
    pub filename: String,
    pub object_name: String,
    pub project_id: Uuid,
    pub size: i64,
    pub content_type: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Joined from the owning project; never written through a file row.
    pub bucket: String,
}

impl File {
    pub fn is_uploaded_by(&self, user_id: Uuid) -> bool {
        self.uploaded_by == user_id
    }
}

/// Values for a file row staged by the upload saga.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub object_name: String,
    pub project_id: Uuid,
    pub size: i64,
    pub content_type: String,
    pub uploaded_by: Uuid,
}

/// Request DTO for minting a signed download link
#[derive(Debug, Deserialize, Validate)]
pub struct ShareFileRequest {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShareFileResponse {
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}
