use super::RemoteStore;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Document, DocumentCreate, Draft, DraftCreate, DraftKind, DraftRef, DraftUpdate, EntityId, Folder,
    FolderCreate, Project,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

/// One request observed by the in-process store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub target: EntityId,
    pub payload: Option<String>,
    pub issued_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_folder_id: EntityId,
    next_document_id: EntityId,
    next_draft_id: BTreeMap<DraftKind, EntityId>,
    projects: BTreeMap<EntityId, Project>,
    folders: Vec<Folder>,
    documents: Vec<Document>,
    drafts: Vec<Draft>,
}

impl MemoryState {
    fn folder_mut(&mut self, folder_id: EntityId) -> AppResult<&mut Folder> {
        self.folders
            .iter_mut()
            .find(|folder| folder.id == folder_id)
            .ok_or_else(|| AppError::NotFound(format!("folder {folder_id}")))
    }

    fn document_mut(&mut self, document_id: EntityId) -> AppResult<&mut Document> {
        self.documents
            .iter_mut()
            .find(|document| document.id == document_id)
            .ok_or_else(|| AppError::NotFound(format!("document {document_id}")))
    }

    fn next_draft_id(&mut self, kind: DraftKind) -> EntityId {
        let next = self.next_draft_id.entry(kind).or_insert(0);
        *next += 1;
        *next
    }

    /// The folder itself plus every folder nested below it.
    fn folder_subtree(&self, root: EntityId) -> HashSet<EntityId> {
        let mut collected = HashSet::from([root]);
        loop {
            let before = collected.len();
            for folder in &self.folders {
                if let Some(parent) = folder.parent_id {
                    if collected.contains(&parent) {
                        collected.insert(folder.id);
                    }
                }
            }
            if collected.len() == before {
                return collected;
            }
        }
    }

    fn next_folder_order(&self, project_id: EntityId, parent_id: Option<EntityId>) -> i64 {
        self.folders
            .iter()
            .filter(|folder| folder.project_id == project_id && folder.parent_id == parent_id)
            .filter_map(|folder| folder.sort_order)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn next_document_order(&self, folder_id: EntityId) -> i64 {
        self.documents
            .iter()
            .filter(|document| document.folder_id == folder_id)
            .filter_map(|document| document.sort_order)
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// In-process implementation of [`RemoteStore`]. Used by tests and offline
/// runs; it records every call and can inject latency or failures.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    calls: Mutex<Vec<RemoteCall>>,
    latency: Mutex<Option<Duration>>,
    fail_field_writes: AtomicBool,
    fail_structure: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("remote state mutex poisoned".to_string()))
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Rejects text/notes/draft-content writes until turned off again.
    pub fn set_fail_field_writes(&self, fail: bool) {
        self.fail_field_writes.store(fail, Ordering::SeqCst);
    }

    /// Rejects create, rename, move and delete requests.
    pub fn set_fail_structure(&self, fail: bool) {
        self.fail_structure.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, op: &str) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.op == op)
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn insert_project(&self, id: EntityId, name: &str) -> AppResult<Project> {
        let project = Project {
            id,
            name: name.to_string(),
            notes: String::new(),
            timeline_start: None,
            timeline_end: None,
        };
        self.state()?.projects.insert(id, project.clone());
        Ok(project)
    }

    /// Seeds a folder without recording a call.
    pub fn insert_folder(
        &self,
        project_id: EntityId,
        parent_id: Option<EntityId>,
        name: &str,
    ) -> AppResult<Folder> {
        let mut state = self.state()?;
        state.next_folder_id += 1;
        let folder = Folder {
            id: state.next_folder_id,
            project_id,
            parent_id,
            name: name.to_string(),
            notes: String::new(),
            sort_order: Some(state.next_folder_order(project_id, parent_id)),
        };
        state.folders.push(folder.clone());
        Ok(folder)
    }

    /// Seeds a document without recording a call.
    pub fn insert_document(
        &self,
        project_id: EntityId,
        folder_id: EntityId,
        name: &str,
        text: &str,
    ) -> AppResult<Document> {
        let mut state = self.state()?;
        state.next_document_id += 1;
        let document = Document {
            id: state.next_document_id,
            project_id,
            folder_id,
            name: name.to_string(),
            text: text.to_string(),
            notes: String::new(),
            sort_order: Some(state.next_document_order(folder_id)),
        };
        state.documents.push(document.clone());
        Ok(document)
    }

    pub fn document(&self, document_id: EntityId) -> Option<Document> {
        let state = self.state().ok()?;
        state
            .documents
            .iter()
            .find(|document| document.id == document_id)
            .cloned()
    }

    pub fn folder(&self, folder_id: EntityId) -> Option<Folder> {
        let state = self.state().ok()?;
        state.folders.iter().find(|folder| folder.id == folder_id).cloned()
    }

    pub fn draft(&self, draft: DraftRef) -> Option<Draft> {
        let state = self.state().ok()?;
        state
            .drafts
            .iter()
            .find(|stored| stored.draft_ref() == draft)
            .cloned()
    }

    pub fn project(&self, project_id: EntityId) -> Option<Project> {
        let state = self.state().ok()?;
        state.projects.get(&project_id).cloned()
    }

    async fn begin(&self, op: &'static str, target: EntityId, payload: Option<&str>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RemoteCall {
                op,
                target,
                payload: payload.map(ToString::to_string),
                issued_at: Instant::now(),
            });
        }
        let latency = self.latency.lock().ok().and_then(|latency| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_field_write(&self, op: &str) -> AppResult<()> {
        if self.fail_field_writes.load(Ordering::SeqCst) {
            return Err(AppError::Remote(format!("{op} rejected by store")));
        }
        Ok(())
    }

    fn check_structure(&self, op: &str) -> AppResult<()> {
        if self.fail_structure.load(Ordering::SeqCst) {
            return Err(AppError::Remote(format!("{op} rejected by store")));
        }
        Ok(())
    }
}

fn reorder<T>(
    items: &mut [T],
    moved_id: EntityId,
    position: usize,
    id_of: impl Fn(&T) -> EntityId,
    order_of: impl Fn(&T) -> Option<i64>,
    set_order: impl Fn(&mut T, i64),
) {
    let mut ordered: Vec<usize> = (0..items.len()).collect();
    ordered.sort_by_key(|&index| (order_of(&items[index]).unwrap_or(i64::MAX), id_of(&items[index])));
    let Some(current) = ordered.iter().position(|&index| id_of(&items[index]) == moved_id) else {
        return;
    };
    let moved = ordered.remove(current);
    let position = position.min(ordered.len());
    ordered.insert(position, moved);
    for (rank, index) in ordered.into_iter().enumerate() {
        set_order(&mut items[index], rank as i64 + 1);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_project(&self, project_id: EntityId) -> AppResult<Project> {
        self.begin("get_project", project_id, None).await;
        self.state()?
            .projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))
    }

    async fn update_project_notes(&self, project_id: EntityId, notes: &str) -> AppResult<()> {
        self.begin("update_project_notes", project_id, Some(notes)).await;
        self.check_field_write("update_project_notes")?;
        let mut state = self.state()?;
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))?;
        project.notes = notes.to_string();
        Ok(())
    }

    async fn list_folders(&self, project_id: EntityId) -> AppResult<Vec<Folder>> {
        self.begin("list_folders", project_id, None).await;
        let state = self.state()?;
        let mut folders: Vec<Folder> = state
            .folders
            .iter()
            .filter(|folder| folder.project_id == project_id)
            .cloned()
            .collect();
        folders.sort_by_key(|folder| (folder.sort_order.unwrap_or(i64::MAX), folder.id));
        Ok(folders)
    }

    async fn create_folder(&self, request: FolderCreate) -> AppResult<Folder> {
        self.begin("create_folder", request.parent_id.unwrap_or(0), Some(&request.name))
            .await;
        self.check_structure("create_folder")?;
        let mut state = self.state()?;
        if let Some(parent_id) = request.parent_id {
            state.folder_mut(parent_id)?;
        }
        let sort_order = match request.after_sort_order {
            Some(after) => {
                for folder in state.folders.iter_mut().filter(|folder| {
                    folder.project_id == request.project_id && folder.parent_id == request.parent_id
                }) {
                    if let Some(order) = folder.sort_order.as_mut() {
                        if *order > after {
                            *order += 1;
                        }
                    }
                }
                after + 1
            }
            None => state.next_folder_order(request.project_id, request.parent_id),
        };
        state.next_folder_id += 1;
        let id = state.next_folder_id;
        state.folders.push(Folder {
            id,
            project_id: request.project_id,
            parent_id: request.parent_id,
            name: request.name,
            notes: String::new(),
            sort_order: Some(sort_order),
        });
        let created = state
            .folders
            .iter()
            .find(|folder| folder.id == id)
            .cloned()
            .context("folder not found after creation")?;
        Ok(created)
    }

    async fn rename_folder(&self, folder_id: EntityId, name: &str) -> AppResult<()> {
        self.begin("rename_folder", folder_id, Some(name)).await;
        self.check_structure("rename_folder")?;
        self.state()?.folder_mut(folder_id)?.name = name.to_string();
        Ok(())
    }

    async fn move_folder(
        &self,
        folder_id: EntityId,
        parent_id: Option<EntityId>,
        position: usize,
    ) -> AppResult<()> {
        self.begin("move_folder", folder_id, None).await;
        self.check_structure("move_folder")?;
        let mut state = self.state()?;
        if let Some(parent_id) = parent_id {
            if state.folder_subtree(folder_id).contains(&parent_id) {
                return Err(AppError::Invalid(format!(
                    "folder {folder_id} cannot be moved inside itself"
                )));
            }
            state.folder_mut(parent_id)?;
        }
        let project_id = {
            let folder = state.folder_mut(folder_id)?;
            folder.parent_id = parent_id;
            folder.project_id
        };
        let mut siblings: Vec<Folder> = state
            .folders
            .iter()
            .filter(|folder| folder.project_id == project_id && folder.parent_id == parent_id)
            .cloned()
            .collect();
        reorder(
            &mut siblings,
            folder_id,
            position,
            |folder| folder.id,
            |folder| folder.sort_order,
            |folder, order| folder.sort_order = Some(order),
        );
        for sibling in siblings {
            state.folder_mut(sibling.id)?.sort_order = sibling.sort_order;
        }
        Ok(())
    }

    async fn delete_folder(&self, folder_id: EntityId) -> AppResult<()> {
        self.begin("delete_folder", folder_id, None).await;
        self.check_structure("delete_folder")?;
        let mut state = self.state()?;
        state.folder_mut(folder_id)?;
        let removed_folders = state.folder_subtree(folder_id);
        let removed_documents: HashSet<EntityId> = state
            .documents
            .iter()
            .filter(|document| removed_folders.contains(&document.folder_id))
            .map(|document| document.id)
            .collect();
        state.folders.retain(|folder| !removed_folders.contains(&folder.id));
        state
            .documents
            .retain(|document| !removed_documents.contains(&document.id));
        state.drafts.retain(|draft| match draft.kind {
            DraftKind::Folder => !removed_folders.contains(&draft.owner_id),
            DraftKind::Document => !removed_documents.contains(&draft.owner_id),
            DraftKind::Project => true,
        });
        Ok(())
    }

    async fn update_folder_notes(&self, folder_id: EntityId, notes: &str) -> AppResult<()> {
        self.begin("update_folder_notes", folder_id, Some(notes)).await;
        self.check_field_write("update_folder_notes")?;
        self.state()?.folder_mut(folder_id)?.notes = notes.to_string();
        Ok(())
    }

    async fn list_documents(&self, project_id: EntityId) -> AppResult<Vec<Document>> {
        self.begin("list_documents", project_id, None).await;
        let state = self.state()?;
        let mut documents: Vec<Document> = state
            .documents
            .iter()
            .filter(|document| document.project_id == project_id)
            .cloned()
            .collect();
        documents.sort_by_key(|document| (document.sort_order.unwrap_or(i64::MAX), document.id));
        Ok(documents)
    }

    async fn get_document(&self, document_id: EntityId) -> AppResult<Option<Document>> {
        self.begin("get_document", document_id, None).await;
        Ok(self
            .state()?
            .documents
            .iter()
            .find(|document| document.id == document_id)
            .cloned())
    }

    async fn create_document(&self, request: DocumentCreate) -> AppResult<Document> {
        self.begin("create_document", request.folder_id, Some(&request.name))
            .await;
        self.check_structure("create_document")?;
        let mut state = self.state()?;
        state.folder_mut(request.folder_id)?;
        let sort_order = match request.after_sort_order {
            Some(after) => {
                for document in state
                    .documents
                    .iter_mut()
                    .filter(|document| document.folder_id == request.folder_id)
                {
                    if let Some(order) = document.sort_order.as_mut() {
                        if *order > after {
                            *order += 1;
                        }
                    }
                }
                after + 1
            }
            None => state.next_document_order(request.folder_id),
        };
        state.next_document_id += 1;
        let id = state.next_document_id;
        state.documents.push(Document {
            id,
            project_id: request.project_id,
            folder_id: request.folder_id,
            name: request.name,
            text: String::new(),
            notes: String::new(),
            sort_order: Some(sort_order),
        });
        let created = state
            .documents
            .iter()
            .find(|document| document.id == id)
            .cloned()
            .context("document not found after creation")?;
        Ok(created)
    }

    async fn rename_document(&self, document_id: EntityId, name: &str) -> AppResult<()> {
        self.begin("rename_document", document_id, Some(name)).await;
        self.check_structure("rename_document")?;
        self.state()?.document_mut(document_id)?.name = name.to_string();
        Ok(())
    }

    async fn move_document(
        &self,
        document_id: EntityId,
        folder_id: EntityId,
        position: usize,
    ) -> AppResult<()> {
        self.begin("move_document", document_id, None).await;
        self.check_structure("move_document")?;
        let mut state = self.state()?;
        state.folder_mut(folder_id)?;
        state.document_mut(document_id)?.folder_id = folder_id;
        let mut siblings: Vec<Document> = state
            .documents
            .iter()
            .filter(|document| document.folder_id == folder_id)
            .cloned()
            .collect();
        reorder(
            &mut siblings,
            document_id,
            position,
            |document| document.id,
            |document| document.sort_order,
            |document, order| document.sort_order = Some(order),
        );
        for sibling in siblings {
            state.document_mut(sibling.id)?.sort_order = sibling.sort_order;
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: EntityId) -> AppResult<()> {
        self.begin("delete_document", document_id, None).await;
        self.check_structure("delete_document")?;
        let mut state = self.state()?;
        state.document_mut(document_id)?;
        state.documents.retain(|document| document.id != document_id);
        state
            .drafts
            .retain(|draft| !(draft.kind == DraftKind::Document && draft.owner_id == document_id));
        Ok(())
    }

    async fn update_document_text(&self, document_id: EntityId, text: &str) -> AppResult<()> {
        self.begin("update_document_text", document_id, Some(text)).await;
        self.check_field_write("update_document_text")?;
        self.state()?.document_mut(document_id)?.text = text.to_string();
        Ok(())
    }

    async fn update_document_notes(&self, document_id: EntityId, notes: &str) -> AppResult<()> {
        self.begin("update_document_notes", document_id, Some(notes)).await;
        self.check_field_write("update_document_notes")?;
        self.state()?.document_mut(document_id)?.notes = notes.to_string();
        Ok(())
    }

    async fn list_drafts(&self, kind: DraftKind, owner_id: EntityId) -> AppResult<Vec<Draft>> {
        self.begin("list_drafts", owner_id, Some(kind.as_str())).await;
        Ok(self
            .state()?
            .drafts
            .iter()
            .filter(|draft| draft.kind == kind && draft.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn create_draft(&self, request: DraftCreate) -> AppResult<Draft> {
        self.begin("create_draft", request.owner_id, Some(&request.name))
            .await;
        self.check_structure("create_draft")?;
        let mut state = self.state()?;
        let now = Utc::now();
        let draft = Draft {
            id: state.next_draft_id(request.kind),
            kind: request.kind,
            owner_id: request.owner_id,
            name: request.name,
            content: request.content,
            created_at: now,
            updated_at: now,
        };
        state.drafts.push(draft.clone());
        Ok(draft)
    }

    async fn update_draft(&self, draft: DraftRef, update: DraftUpdate) -> AppResult<Draft> {
        self.begin("update_draft", draft.id, update.content.as_deref())
            .await;
        if update.content.is_some() {
            self.check_field_write("update_draft")?;
        } else {
            self.check_structure("update_draft")?;
        }
        let mut state = self.state()?;
        let stored = state
            .drafts
            .iter_mut()
            .find(|stored| stored.draft_ref() == draft)
            .ok_or_else(|| AppError::NotFound(format!("{} draft {}", draft.kind.as_str(), draft.id)))?;
        if let Some(name) = update.name {
            stored.name = name;
        }
        if let Some(content) = update.content {
            stored.content = content;
        }
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_draft(&self, draft: DraftRef) -> AppResult<()> {
        self.begin("delete_draft", draft.id, Some(draft.kind.as_str())).await;
        self.check_structure("delete_draft")?;
        let mut state = self.state()?;
        let before = state.drafts.len();
        state.drafts.retain(|stored| stored.draft_ref() != draft);
        if state.drafts.len() == before {
            return Err(AppError::NotFound(format!(
                "{} draft {}",
                draft.kind.as_str(),
                draft.id
            )));
        }
        Ok(())
    }
}
