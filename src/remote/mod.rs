pub mod memory;

use crate::errors::AppResult;
use crate::models::{
    Document, DocumentCreate, Draft, DraftCreate, DraftKind, DraftRef, DraftUpdate, EntityId, Folder,
    FolderCreate, Project,
};
use async_trait::async_trait;

/// Request/response boundary to the persistence backend. Every call is an
/// opaque suspension point; failures come back as `AppError::Remote` (or
/// `NotFound`) and are never retried here.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_project(&self, project_id: EntityId) -> AppResult<Project>;
    async fn update_project_notes(&self, project_id: EntityId, notes: &str) -> AppResult<()>;

    async fn list_folders(&self, project_id: EntityId) -> AppResult<Vec<Folder>>;
    async fn create_folder(&self, request: FolderCreate) -> AppResult<Folder>;
    async fn rename_folder(&self, folder_id: EntityId, name: &str) -> AppResult<()>;
    async fn move_folder(
        &self,
        folder_id: EntityId,
        parent_id: Option<EntityId>,
        position: usize,
    ) -> AppResult<()>;
    /// Removes the folder together with its nested folders and documents.
    async fn delete_folder(&self, folder_id: EntityId) -> AppResult<()>;
    async fn update_folder_notes(&self, folder_id: EntityId, notes: &str) -> AppResult<()>;

    async fn list_documents(&self, project_id: EntityId) -> AppResult<Vec<Document>>;
    async fn get_document(&self, document_id: EntityId) -> AppResult<Option<Document>>;
    async fn create_document(&self, request: DocumentCreate) -> AppResult<Document>;
    async fn rename_document(&self, document_id: EntityId, name: &str) -> AppResult<()>;
    async fn move_document(
        &self,
        document_id: EntityId,
        folder_id: EntityId,
        position: usize,
    ) -> AppResult<()>;
    async fn delete_document(&self, document_id: EntityId) -> AppResult<()>;
    async fn update_document_text(&self, document_id: EntityId, text: &str) -> AppResult<()>;
    async fn update_document_notes(&self, document_id: EntityId, notes: &str) -> AppResult<()>;

    async fn list_drafts(&self, kind: DraftKind, owner_id: EntityId) -> AppResult<Vec<Draft>>;
    async fn create_draft(&self, request: DraftCreate) -> AppResult<Draft>;
    async fn update_draft(&self, draft: DraftRef, update: DraftUpdate) -> AppResult<Draft>;
    async fn delete_draft(&self, draft: DraftRef) -> AppResult<()>;
}
