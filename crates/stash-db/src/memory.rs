//! In-memory metadata store with fault injection
//!
//! A transaction works on a private copy of the tables and replays its writes
//! onto the shared tables at commit, so uncommitted rows stay invisible to other
//! readers. Deleting a project cascades to its files and API keys.

use crate::db::outbox::CLAIM_LEASE_SECS;
use crate::db::store::{ApiKeyStore, MetadataStore, MetadataTx, OutboxStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::models::{
    ApiKey, CompensationOp, File, NewApiKey, NewFile, OutboxEntry, OutboxStatus,
    PendingCompensation, Project,
};
use stash_core::AppError;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaFault {
    Begin,
    InsertProject,
    InsertFile,
    UpdateFileSize,
    DeleteProject,
    DeleteFile,
    StageCleanup,
    Commit,
    Rollback,
    /// Pool-level outbox writes (`enqueue`, `mark_done`, `record_failure`).
    Outbox,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    projects: BTreeMap<Uuid, Project>,
    files: BTreeMap<Uuid, File>,
    api_keys: BTreeMap<Uuid, ApiKey>,
    outbox: BTreeMap<Uuid, OutboxEntry>,
}

impl Tables {
    fn bucket_taken(&self, bucket: &str) -> bool {
        self.projects.values().any(|p| p.bucket == bucket)
    }

    fn bucket_removal_pending(&self, bucket: &str) -> bool {
        self.outbox.values().any(|e| {
            e.operation == CompensationOp::RemoveBucket
                && e.status == OutboxStatus::Pending
                && e.bucket == bucket
        })
    }

    fn apply(&mut self, op: &TxOp) -> Result<(), AppError> {
        match op {
            TxOp::InsertProject(project) => {
                if self.bucket_taken(&project.bucket) {
                    return Err(AppError::Conflict("project already exists".to_string()));
                }
                self.projects.insert(project.id, project.clone());
            }
            TxOp::DeleteProject(id) => {
                self.projects.remove(id);
                self.files.retain(|_, f| f.project_id != *id);
                self.api_keys.retain(|_, k| k.project_id != *id);
            }
            TxOp::InsertFile(file) => {
                if !self.projects.contains_key(&file.project_id) {
                    return Err(AppError::NotFound("project not found".to_string()));
                }
                self.files.insert(file.id, file.clone());
            }
            TxOp::UpdateFileSize(id, size) => {
                if let Some(file) = self.files.get_mut(id) {
                    file.size = *size;
                }
            }
            TxOp::DeleteFile(id) => {
                self.files.remove(id);
            }
            TxOp::InsertOutbox(entry) => {
                self.outbox.insert(entry.id, entry.clone());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum TxOp {
    InsertProject(Project),
    DeleteProject(Uuid),
    InsertFile(File),
    UpdateFileSize(Uuid, i64),
    DeleteFile(Uuid),
    InsertOutbox(OutboxEntry),
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    faults: HashSet<MetaFault>,
}

/// Metadata, API key and outbox store backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later call of `op` fail until cleared.
    pub fn fail_on(&self, op: MetaFault) {
        self.lock().faults.insert(op);
    }

    pub fn clear_fault(&self, op: MetaFault) {
        self.lock().faults.remove(&op);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn projects(&self) -> Vec<Project> {
        self.lock().tables.projects.values().cloned().collect()
    }

    pub fn files(&self) -> Vec<File> {
        self.lock().tables.files.values().cloned().collect()
    }

    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.lock().tables.outbox.values().cloned().collect()
    }

    /// Insert a committed project directly, bypassing the saga.
    pub fn seed_project(&self, owner_id: Uuid, bucket: &str) -> Project {
        let project = new_project(owner_id, bucket);
        self.lock()
            .tables
            .projects
            .insert(project.id, project.clone());
        project
    }

    fn check(&self, op: MetaFault) -> Result<(), AppError> {
        if self.lock().faults.contains(&op) {
            return Err(AppError::Internal(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }
}

fn new_project(owner_id: Uuid, bucket: &str) -> Project {
    let now = Utc::now();
    Project {
        id: Uuid::new_v4(),
        owner_id,
        bucket: bucket.to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn new_outbox_entry(cleanup: &PendingCompensation) -> OutboxEntry {
    let now = Utc::now();
    OutboxEntry {
        id: Uuid::new_v4(),
        operation: cleanup.operation,
        bucket: cleanup.bucket.clone(),
        object_name: cleanup.object_name.clone(),
        status: OutboxStatus::Pending,
        attempts: 0,
        last_error: None,
        next_attempt_at: now,
        created_at: now,
        updated_at: now,
    }
}

pub struct MemoryTx {
    store: MemoryMetadataStore,
    view: Tables,
    ops: Vec<TxOp>,
}

impl MemoryTx {
    fn record(&mut self, op: TxOp) -> Result<(), AppError> {
        self.view.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl MetadataTx for MemoryTx {
    async fn insert_project(&mut self, owner_id: Uuid, bucket: &str) -> Result<Project, AppError> {
        self.store.check(MetaFault::InsertProject)?;
        let project = new_project(owner_id, bucket);
        self.record(TxOp::InsertProject(project.clone()))?;
        Ok(project)
    }

    async fn bucket_removal_pending(&mut self, bucket: &str) -> Result<bool, AppError> {
        // Committed outbox state plus this transaction's own entries, as under read committed.
        let staged = self.ops.iter().any(|op| {
            matches!(op, TxOp::InsertOutbox(e)
                if e.operation == CompensationOp::RemoveBucket && e.bucket == bucket)
        });
        Ok(staged || self.store.lock().tables.bucket_removal_pending(bucket))
    }

    async fn get_project(&mut self, id: Uuid) -> Result<Project, AppError> {
        self.view
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("project not found".to_string()))
    }

    async fn delete_project(&mut self, id: Uuid) -> Result<(), AppError> {
        self.store.check(MetaFault::DeleteProject)?;
        if !self.view.projects.contains_key(&id) {
            return Err(AppError::NotFound("project not found".to_string()));
        }
        self.record(TxOp::DeleteProject(id))
    }

    async fn insert_file(&mut self, file: &NewFile) -> Result<File, AppError> {
        self.store.check(MetaFault::InsertFile)?;
        let bucket = self
            .view
            .projects
            .get(&file.project_id)
            .map(|p| p.bucket.clone())
            .ok_or_else(|| AppError::NotFound("project not found".to_string()))?;
        let row = File {
            id: Uuid::new_v4(),
            filename: file.filename.clone(),
            object_name: file.object_name.clone(),
            project_id: file.project_id,
            size: file.size,
            content_type: file.content_type.clone(),
            uploaded_by: file.uploaded_by,
            created_at: Utc::now(),
            bucket,
        };
        self.record(TxOp::InsertFile(row.clone()))?;
        Ok(row)
    }

    async fn get_file(&mut self, id: Uuid) -> Result<File, AppError> {
        self.view
            .files
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("file not found".to_string()))
    }

    async fn update_file_size(&mut self, id: Uuid, size: i64) -> Result<(), AppError> {
        self.store.check(MetaFault::UpdateFileSize)?;
        if !self.view.files.contains_key(&id) {
            return Err(AppError::NotFound("file not found".to_string()));
        }
        self.record(TxOp::UpdateFileSize(id, size))
    }

    async fn delete_file(&mut self, id: Uuid) -> Result<(), AppError> {
        self.store.check(MetaFault::DeleteFile)?;
        if !self.view.files.contains_key(&id) {
            return Err(AppError::NotFound("file not found".to_string()));
        }
        self.record(TxOp::DeleteFile(id))
    }

    async fn stage_cleanup(&mut self, cleanup: &PendingCompensation) -> Result<Uuid, AppError> {
        self.store.check(MetaFault::StageCleanup)?;
        let entry = new_outbox_entry(cleanup);
        let id = entry.id;
        self.record(TxOp::InsertOutbox(entry))?;
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.store.check(MetaFault::Commit)?;
        let mut inner = self.store.lock();
        let mut next = inner.tables.clone();
        for op in &self.ops {
            next.apply(op)?;
        }
        inner.tables = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.store.check(MetaFault::Rollback)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, AppError> {
        self.check(MetaFault::Begin)?;
        let view = self.lock().tables.clone();
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            view,
            ops: Vec::new(),
        }))
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        Ok(self.lock().tables.projects.get(&id).cloned())
    }

    async fn list_projects_by_owner(&self, owner_id: Uuid) -> Result<Vec<Project>, AppError> {
        Ok(self
            .lock()
            .tables
            .projects
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_project_by_bucket(&self, bucket: &str) -> Result<Option<Project>, AppError> {
        Ok(self
            .lock()
            .tables
            .projects
            .values()
            .find(|p| p.bucket == bucket)
            .cloned())
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<File>, AppError> {
        Ok(self.lock().tables.files.get(&id).cloned())
    }

    async fn list_files_by_project(&self, project_id: Uuid) -> Result<Vec<File>, AppError> {
        Ok(self
            .lock()
            .tables
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_files_by_uploader(&self, user_id: Uuid) -> Result<Vec<File>, AppError> {
        Ok(self
            .lock()
            .tables
            .files
            .values()
            .filter(|f| f.uploaded_by == user_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryMetadataStore {
    async fn create(&self, key: &NewApiKey) -> Result<ApiKey, AppError> {
        let mut inner = self.lock();
        if !inner.tables.projects.contains_key(&key.project_id) {
            return Err(AppError::NotFound("project not found".to_string()));
        }
        let row = ApiKey {
            id: Uuid::new_v4(),
            key_prefix: key.key_prefix.clone(),
            key_hash: key.key_hash.clone(),
            name: key.name.clone(),
            project_id: key.project_id,
            user_id: key.user_id,
            expires_at: key.expires_at,
            revoked_at: None,
            created_at: Utc::now(),
        };
        inner.tables.api_keys.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Vec<ApiKey>, AppError> {
        Ok(self
            .lock()
            .tables
            .api_keys
            .values()
            .filter(|k| k.key_prefix == key_prefix && k.revoked_at.is_none())
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid, user_id: Uuid) -> Result<Option<ApiKey>, AppError> {
        Ok(self
            .lock()
            .tables
            .api_keys
            .get(&id)
            .filter(|k| k.user_id == user_id)
            .cloned())
    }

    async fn list_by_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ApiKey>, AppError> {
        Ok(self
            .lock()
            .tables
            .api_keys
            .values()
            .filter(|k| k.project_id == project_id && k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        Ok(self
            .lock()
            .tables
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.tables.api_keys.get_mut(&id) {
            Some(key) if key.user_id == user_id && key.revoked_at.is_none() => {
                key.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.lock();
        let owned = inner
            .tables
            .api_keys
            .get(&id)
            .is_some_and(|k| k.user_id == user_id);
        if owned {
            inner.tables.api_keys.remove(&id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl OutboxStore for MemoryMetadataStore {
    async fn enqueue(&self, cleanup: &PendingCompensation) -> Result<OutboxEntry, AppError> {
        self.check(MetaFault::Outbox)?;
        let entry = new_outbox_entry(cleanup);
        self.lock().tables.outbox.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, AppError> {
        Ok(self.lock().tables.outbox.get(&id).cloned())
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError> {
        let mut inner = self.lock();
        let mut due: Vec<&mut OutboxEntry> = inner
            .tables
            .outbox
            .values_mut()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due.truncate(limit.max(0) as usize);

        let lease_until = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
        Ok(due
            .into_iter()
            .map(|entry| {
                entry.next_attempt_at = lease_until;
                entry.updated_at = Utc::now();
                entry.clone()
            })
            .collect())
    }

    async fn mark_done(&self, id: Uuid) -> Result<(), AppError> {
        self.check(MetaFault::Outbox)?;
        if let Some(entry) = self.lock().tables.outbox.get_mut(&id) {
            entry.status = OutboxStatus::Done;
            entry.last_error = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        park: bool,
    ) -> Result<(), AppError> {
        self.check(MetaFault::Outbox)?;
        if let Some(entry) = self.lock().tables.outbox.get_mut(&id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.next_attempt_at = next_attempt_at;
            entry.status = if park {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_rows_are_invisible() {
        let store = MemoryMetadataStore::new();
        let owner = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let project = tx.insert_project(owner, "proj-abc").await.unwrap();
        assert!(tx.get_project(project.id).await.is_ok());
        assert!(store.get_project(project.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get_project(project.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryMetadataStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_project(Uuid::new_v4(), "proj-abc").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.projects().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_bucket_conflicts() {
        let store = MemoryMetadataStore::new();
        store.seed_project(Uuid::new_v4(), "proj-abc");

        let mut tx = store.begin().await.unwrap();
        let result = tx.insert_project(Uuid::new_v4(), "proj-abc").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let store = MemoryMetadataStore::new();
        let owner = Uuid::new_v4();
        let project = store.seed_project(owner, "proj-abc");

        let mut tx = store.begin().await.unwrap();
        tx.insert_file(&NewFile {
            filename: "a.txt".to_string(),
            object_name: "proj-abc-1-a.txt".to_string(),
            project_id: project.id,
            size: 1,
            content_type: "text/plain".to_string(),
            uploaded_by: owner,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.files().len(), 1);

        let mut tx = store.begin().await.unwrap();
        tx.delete_project(project.id).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.files().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_due_claims_entries() {
        let store = MemoryMetadataStore::new();
        let entry = store
            .enqueue(&PendingCompensation::remove_bucket("proj-abc"))
            .await
            .unwrap();
        let now = Utc::now();

        let first = store.fetch_due(now, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(store.fetch_due(now, 10).await.unwrap().is_empty());

        let lease_over = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
        let again = store.fetch_due(lease_over, 10).await.unwrap();
        assert_eq!(again[0].id, entry.id);
    }

    #[tokio::test]
    async fn test_bucket_removal_pending_sees_committed_outbox() {
        let store = MemoryMetadataStore::new();
        let entry = store
            .enqueue(&PendingCompensation::remove_bucket("proj-abc"))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.bucket_removal_pending("proj-abc").await.unwrap());
        assert!(!tx.bucket_removal_pending("proj-other").await.unwrap());

        store.mark_done(entry.id).await.unwrap();
        assert!(!tx.bucket_removal_pending("proj-abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_twice() {
        let store = MemoryMetadataStore::new();
        let owner = Uuid::new_v4();
        let project = store.seed_project(owner, "proj-abc");
        let key = store
            .create(&NewApiKey {
                key_prefix: "sgs_abcdefghijkl".to_string(),
                key_hash: "hash".to_string(),
                name: "ci-key".to_string(),
                project_id: project.id,
                user_id: owner,
                expires_at: Utc::now() + chrono::Duration::hours(2),
            })
            .await
            .unwrap();

        assert!(store.revoke(key.id, owner).await.unwrap());
        assert!(!store.revoke(key.id, owner).await.unwrap());
    }
}
