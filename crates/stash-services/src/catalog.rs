//! Read-side access to projects and files, with ownership checks.

use stash_core::models::{File, Project};
use stash_core::AppError;
use stash_db::MetadataStore;
use stash_storage::{BlobStore, ObjectDownload};
use std::sync::Arc;
use uuid::Uuid;

use crate::signed_url::SignedUrlClaims;

#[derive(Clone)]
pub struct CatalogService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
}

impl CatalogService {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { metadata, blobs }
    }

    pub async fn list_projects(&self, owner_id: Uuid) -> Result<Vec<Project>, AppError> {
        self.metadata.list_projects_by_owner(owner_id).await
    }

    pub async fn get_project(&self, project_id: Uuid, user_id: Uuid) -> Result<Project, AppError> {
        let project = self
            .metadata
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
        if !project.is_owned_by(user_id) {
            return Err(AppError::Forbidden(
                "You do not have access to this project".to_string(),
            ));
        }
        Ok(project)
    }

    pub async fn list_project_files(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<File>, AppError> {
        self.get_project(project_id, user_id).await?;
        self.metadata.list_files_by_project(project_id).await
    }

    pub async fn list_user_files(&self, user_id: Uuid) -> Result<Vec<File>, AppError> {
        self.metadata.list_files_by_uploader(user_id).await
    }

    /// A file's metadata, for its uploader only.
    pub async fn get_file(&self, file_id: Uuid, user_id: Uuid) -> Result<File, AppError> {
        let file = self.find_file(file_id).await?;
        if !file.is_uploaded_by(user_id) {
            return Err(AppError::Forbidden(
                "You do not have access to this file".to_string(),
            ));
        }
        Ok(file)
    }

    /// Open a file for direct download by its uploader.
    pub async fn download(
        &self,
        file_id: Uuid,
        user_id: Uuid,
    ) -> Result<(File, ObjectDownload), AppError> {
        let file = self.get_file(file_id, user_id).await?;
        let download = self.blobs.get_object(&file.bucket, &file.object_name).await?;
        Ok((file, download))
    }

    /// Open the file a verified signed link points at.
    ///
    /// The link only resolves while the file still lives in the bucket it was
    /// issued for, so deleting the project kills every link into it.
    pub async fn download_signed(
        &self,
        claims: &SignedUrlClaims,
    ) -> Result<(File, ObjectDownload), AppError> {
        let file = self.find_file(claims.sub).await?;
        if file.bucket != claims.bucket {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        let download = self.blobs.get_object(&file.bucket, &file.object_name).await?;
        Ok((file, download))
    }

    async fn find_file(&self, file_id: Uuid) -> Result<File, AppError> {
        self.metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{SagaCoordinator, UploadRequest};
    use stash_db::MemoryMetadataStore;
    use stash_storage::MemoryBlobStore;
    use std::io::Cursor;

    async fn seeded() -> (CatalogService, File, Uuid) {
        let meta = MemoryMetadataStore::new();
        let blobs = MemoryBlobStore::new();
        let saga = SagaCoordinator::new(
            Arc::new(meta.clone()),
            Arc::new(blobs.clone()),
            Arc::new(meta.clone()),
        );
        let owner = Uuid::new_v4();
        let project = saga.create_project(owner, "proj-abc").await.unwrap();
        let file = saga
            .upload_file(UploadRequest {
                project_id: project.id,
                uploaded_by: owner,
                filename: "notes.txt".to_string(),
                content_type: None,
                content_length: None,
                reader: Box::pin(Cursor::new(b"hello".to_vec())),
            })
            .await
            .unwrap();
        (
            CatalogService::new(Arc::new(meta), Arc::new(blobs)),
            file,
            owner,
        )
    }

    #[tokio::test]
    async fn test_download_returns_size_and_content_type() {
        let (catalog, file, owner) = seeded().await;

        let (meta, download) = catalog.download(file.id, owner).await.unwrap();

        assert_eq!(meta.id, file.id);
        assert_eq!(download.size, 5);
        assert_eq!(download.content_type, file.content_type);
    }

    #[tokio::test]
    async fn test_file_access_is_uploader_only() {
        let (catalog, file, _) = seeded().await;
        let stranger = Uuid::new_v4();

        assert!(matches!(catalog.get_file(file.id, stranger).await, Err(AppError::Forbidden(_))));
        assert!(matches!(catalog.download(file.id, stranger).await, Err(AppError::Forbidden(_))));
        assert!(matches!(
            catalog.get_project(file.project_id, stranger).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_download_checks_bucket_claim() {
        let (catalog, file, owner) = seeded().await;
        let mut claims = SignedUrlClaims {
            sub: file.id,
            bucket: file.bucket.clone(),
            exp: 0,
            iat: 0,
        };

        assert!(catalog.download_signed(&claims).await.is_ok());

        claims.bucket = "proj-other".to_string();
        assert!(matches!(catalog.download_signed(&claims).await, Err(AppError::NotFound(_))));

        assert_eq!(catalog.list_user_files(owner).await.unwrap().len(), 1);
        assert_eq!(
            catalog.list_project_files(file.project_id, owner).await.unwrap().len(),
            1
        );
    }
}
