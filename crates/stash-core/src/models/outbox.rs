use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Blob-store cleanup recorded for later retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOp {
    RemoveBucket,
    RemoveObject,
}

impl FromStr for CompensationOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remove_bucket" => Ok(CompensationOp::RemoveBucket),
            "remove_object" => Ok(CompensationOp::RemoveObject),
            _ => Err(anyhow::anyhow!("Invalid compensation operation: {}", s)),
        }
    }
}

impl Display for CompensationOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CompensationOp::RemoveBucket => write!(f, "remove_bucket"),
            CompensationOp::RemoveObject => write!(f, "remove_object"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Done,
    /// Out of attempts; needs manual reconciliation.
    Failed,
}

impl FromStr for OutboxStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "done" => Ok(OutboxStatus::Done),
            "failed" => Ok(OutboxStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid outbox status: {}", s)),
        }
    }
}

impl Display for OutboxStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Done => write!(f, "done"),
            OutboxStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A cleanup the saga could not, or has not yet, confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCompensation {
    pub operation: CompensationOp,
    pub bucket: String,
    pub object_name: Option<String>,
}

impl PendingCompensation {
    pub fn remove_bucket(bucket: impl Into<String>) -> Self {
        Self {
            operation: CompensationOp::RemoveBucket,
            bucket: bucket.into(),
            object_name: None,
        }
    }

    pub fn remove_object(bucket: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            operation: CompensationOp::RemoveObject,
            bucket: bucket.into(),
            object_name: Some(object_name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub operation: CompensationOp,
    pub bucket: String,
    pub object_name: Option<String>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn compensation(&self) -> PendingCompensation {
        PendingCompensation {
            operation: self.operation,
            bucket: self.bucket.clone(),
            object_name: self.object_name.clone(),
        }
    }
}
