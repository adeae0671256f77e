use crate::config::SyncConfig;
use crate::drafts::{ActiveDrafts, DraftClick, ScopeExclusivityController};
use crate::errors::{to_client_error, AppError, AppResult};
use crate::hierarchy::selection::{
    initial_selection, load_persisted, neighbor_for_removal, rebind, save_persisted, SelectOutcome,
    Selection, SelectionState,
};
use crate::hierarchy::{Forest, HierarchyRebuilder};
use crate::keys::FieldKey;
use crate::kv::{KeyValueStore, LocalMirror};
use crate::models::{
    Document, DocumentCreate, Draft, DraftCreate, DraftKind, DraftRef, DraftUpdate, EntityId, Folder,
    FolderCreate, NodeKind, Project, SyncStatus,
};
use crate::remote::RemoteStore;
use crate::signals::{Signal, SignalBus, SignalEnvelope};
use crate::sync::EditSync;
use chrono::Local;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Input coming from the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    FieldChanged {
        key: FieldKey,
        content: String,
        cursor: Option<usize>,
    },
    FieldBlurred(FieldKey),
    EntitySelected {
        kind: NodeKind,
        id: EntityId,
    },
    Command(MutationCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCommand {
    CreateFolder { name: Option<String> },
    CreateDocument { name: Option<String> },
    Delete(Selection),
    Rename { target: Selection, name: String },
    MoveFolder {
        folder_id: EntityId,
        parent_id: Option<EntityId>,
        position: usize,
    },
    MoveDocument {
        document_id: EntityId,
        folder_id: EntityId,
        position: usize,
    },
    CreateDraft(DraftKind),
    DeleteDraft(DraftRef),
    RenameDraft { draft: DraftRef, name: String },
    RestoreDraft(DraftRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDirection {
    Up,
    Down,
}

#[derive(Debug, Default)]
struct DraftShelf {
    owner_id: Option<EntityId>,
    drafts: Vec<Draft>,
}

#[derive(Debug)]
struct ViewState {
    project: Option<Project>,
    selection: SelectionState,
    hierarchy: HierarchyRebuilder,
    drafts: ScopeExclusivityController,
    shelves: HashMap<DraftKind, DraftShelf>,
}

/// One open project: routes field edits into the sync pipeline and runs the
/// structural commands that rebuild the hierarchy.
pub struct ProjectWorkspace {
    this: Weak<ProjectWorkspace>,
    project_id: EntityId,
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    mirror: LocalMirror,
    sync: EditSync,
    signals: SignalBus,
    state: Mutex<ViewState>,
    structure_lock: tokio::sync::Mutex<()>,
}

impl ProjectWorkspace {
    pub fn new(
        project_id: EntityId,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let mirror = LocalMirror::new(store);
        let signals = SignalBus::new(config.signal_capacity);
        let sync = EditSync::new(remote.clone(), mirror.clone(), signals.clone(), config.clone());
        let state = ViewState {
            project: None,
            selection: SelectionState::default(),
            hierarchy: HierarchyRebuilder::new(project_id, mirror.clone()),
            drafts: ScopeExclusivityController::new(
                project_id,
                mirror.clone(),
                config.rename_grace(),
            ),
            shelves: HashMap::new(),
        };
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            project_id,
            config,
            remote,
            mirror,
            sync,
            signals,
            state: Mutex::new(state),
            structure_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn project_id(&self) -> EntityId {
        self.project_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEnvelope> {
        self.signals.subscribe()
    }

    pub fn edit_sync(&self) -> &EditSync {
        &self.sync
    }

    /// Loads the project, rebuilds the tree, recovers unsynced edits and
    /// restores the previous selection and active draft.
    pub async fn load(&self) -> AppResult<()> {
        let project = self.remote.get_project(self.project_id).await?;
        self.sync
            .hydrate(FieldKey::ProjectNotes(project.id), &project.notes);
        self.state().project = Some(project);

        let forest = self.reload_forest().await?;
        let recovered = self.sync.recover();
        if !recovered.is_empty() {
            tracing::info!(
                project_id = self.project_id,
                count = recovered.len(),
                "unsynced edits scheduled for retry"
            );
        }

        let active = self.state().drafts.restore();
        self.signals.emit(Signal::ActiveDraft(active));
        if let Err(error) = self.load_shelf(DraftKind::Project, self.project_id).await {
            tracing::warn!(project_id = self.project_id, error = %error, "failed to list project drafts");
        }

        let remembered = load_persisted(&self.mirror, self.project_id);
        let initial = initial_selection(remembered, &forest);
        self.set_selection(initial).await;
        self.reconcile_active_drafts(initial);
        tracing::info!(project_id = self.project_id, selection = ?initial, "project loaded");
        Ok(())
    }

    pub async fn handle(&self, event: ViewEvent) -> AppResult<()> {
        match event {
            ViewEvent::FieldChanged {
                key,
                content,
                cursor,
            } => self.field_changed(key, &content, cursor),
            ViewEvent::FieldBlurred(key) => self.field_blurred(key).await,
            ViewEvent::EntitySelected { kind, id } => {
                self.select(Selection::from_node(kind, id)).await?;
            }
            ViewEvent::Command(command) => self.run_command(command).await?,
        }
        Ok(())
    }

    async fn run_command(&self, command: MutationCommand) -> AppResult<()> {
        match command {
            MutationCommand::CreateFolder { name } => {
                self.create_folder(name).await?;
            }
            MutationCommand::CreateDocument { name } => {
                self.create_document(name).await?;
            }
            MutationCommand::Delete(target) => self.delete(target).await?,
            MutationCommand::Rename { target, name } => self.rename(target, &name).await?,
            MutationCommand::MoveFolder {
                folder_id,
                parent_id,
                position,
            } => self.move_folder(folder_id, parent_id, position).await?,
            MutationCommand::MoveDocument {
                document_id,
                folder_id,
                position,
            } => self.move_document(document_id, folder_id, position).await?,
            MutationCommand::CreateDraft(kind) => {
                self.create_draft(kind).await?;
            }
            MutationCommand::DeleteDraft(draft) => self.delete_draft(draft).await?,
            MutationCommand::RenameDraft { draft, name } => {
                self.rename_draft(draft, &name).await?;
            }
            MutationCommand::RestoreDraft(draft) => {
                self.restore_draft_to_document(draft).await?;
            }
        }
        Ok(())
    }

    pub fn field_changed(&self, key: FieldKey, content: &str, cursor: Option<usize>) {
        self.sync.edit(key, content, cursor);
    }

    pub async fn field_blurred(&self, key: FieldKey) {
        self.sync.commit_now(key).await;
    }

    /// Flushes every pending edit, e.g. when the window is hidden or closed.
    pub async fn suspend(&self) {
        self.sync.commit_all().await;
    }

    pub fn field_value(&self, key: &FieldKey) -> Option<String> {
        self.sync.value(key)
    }

    pub fn sync_status(&self, key: &FieldKey) -> Option<SyncStatus> {
        self.sync.status(key)
    }

    pub fn selection(&self) -> Selection {
        self.state().selection.current()
    }

    pub fn forest(&self) -> Arc<Forest> {
        self.state().hierarchy.forest()
    }

    pub fn project(&self) -> Option<Project> {
        self.state().project.clone()
    }

    pub fn active_drafts(&self) -> ActiveDrafts {
        self.state().drafts.active()
    }

    /// Drafts on one shelf, with unsynced content and refreshed metadata
    /// overlaid.
    pub fn drafts(&self, kind: DraftKind) -> Vec<Draft> {
        let listed = self
            .state()
            .shelves
            .get(&kind)
            .map(|shelf| shelf.drafts.clone())
            .unwrap_or_default();
        listed
            .into_iter()
            .map(|draft| {
                let mut draft = self
                    .sync
                    .draft_metadata(&draft.draft_ref())
                    .unwrap_or(draft);
                if let Some(content) = self.sync.value(&FieldKey::DraftContent(draft.draft_ref())) {
                    draft.content = content;
                }
                draft
            })
            .collect()
    }

    pub fn word_count(&self) -> usize {
        self.selection()
            .document_id()
            .and_then(|id| self.sync.value(&FieldKey::DocumentBody(id)))
            .map(|text| text.split_whitespace().count())
            .unwrap_or(0)
    }

    pub async fn select_document(&self, document_id: EntityId) -> AppResult<Selection> {
        self.select(Selection::Document(document_id)).await
    }

    pub async fn select_folder(&self, folder_id: EntityId) -> AppResult<Selection> {
        self.select(Selection::Folder(folder_id)).await
    }

    /// Selecting the already selected folder toggles its expansion instead.
    pub async fn select(&self, selection: Selection) -> AppResult<Selection> {
        let forest = self.forest();
        if rebind(selection, &forest) != selection {
            return Err(AppError::NotFound(format!("{selection:?} is not in the hierarchy")));
        }
        let (previous, outcome) = {
            let mut state = self.state();
            let previous = state.selection.current();
            let outcome = match selection {
                Selection::Folder(id) => state.selection.select_folder(id),
                other => state.selection.set(other),
            };
            (previous, outcome)
        };
        match outcome {
            SelectOutcome::Reselected => {
                if let Some(folder_id) = selection.folder_id() {
                    self.toggle_folder(folder_id);
                }
            }
            SelectOutcome::Changed => self.selection_changed(previous, selection).await,
            SelectOutcome::Unchanged => {}
        }
        Ok(selection)
    }

    pub fn toggle_folder(&self, folder_id: EntityId) -> bool {
        let (expanded, forest) = {
            let mut state = self.state();
            let expanded = state.hierarchy.toggle(folder_id);
            (expanded, state.hierarchy.forest())
        };
        self.signals.emit(Signal::Hierarchy(forest));
        expanded
    }

    /// Moves the selection one visible row up or down, wrapping at the ends.
    pub async fn navigate(&self, direction: NavDirection) -> AppResult<Selection> {
        let items = self.forest().visible_items();
        if items.is_empty() {
            return Ok(self.selection());
        }
        let current = self.selection();
        let position = items
            .iter()
            .position(|item| Selection::from_node(item.kind, item.id) == current);
        let next = match (position, direction) {
            (None, _) => 0,
            (Some(index), NavDirection::Down) => (index + 1) % items.len(),
            (Some(index), NavDirection::Up) => (index + items.len() - 1) % items.len(),
        };
        let target = Selection::from_node(items[next].kind, items[next].id);
        if target == current {
            return Ok(current);
        }
        self.select(target).await
    }

    pub fn expand_selected(&self) {
        if let Selection::Folder(folder_id) = self.selection() {
            let forest = {
                let mut state = self.state();
                state.hierarchy.expand(folder_id);
                state.hierarchy.forest()
            };
            self.signals.emit(Signal::Hierarchy(forest));
        }
    }

    /// Collapses the selected folder; on a document, selects its folder.
    pub async fn collapse_selected(&self) -> AppResult<Selection> {
        match self.selection() {
            Selection::Folder(folder_id) => {
                let forest = {
                    let mut state = self.state();
                    state.hierarchy.collapse(folder_id);
                    state.hierarchy.forest()
                };
                self.signals.emit(Signal::Hierarchy(forest));
                Ok(Selection::Folder(folder_id))
            }
            Selection::Document(document_id) => match self.forest().document_folder(document_id) {
                Some(folder_id) => self.select(Selection::Folder(folder_id)).await,
                None => Ok(self.selection()),
            },
            Selection::None => Ok(Selection::None),
        }
    }

    pub async fn create_folder(&self, name: Option<String>) -> AppResult<Folder> {
        let _guard = self.structure_lock.lock().await;
        let name = non_blank(name.as_deref(), &self.config.default_folder_name);
        let forest = self.forest();
        let (parent_id, after_sort_order) = match self.selection() {
            Selection::Folder(id) => forest
                .folder(id)
                .map(|node| (node.folder.parent_id, node.folder.sort_order))
                .unwrap_or((None, None)),
            _ => (None, None),
        };
        let request = FolderCreate {
            project_id: self.project_id,
            name,
            parent_id,
            after_sort_order,
        };
        let created = match self.remote.create_folder(request).await {
            Ok(folder) => folder,
            Err(error) => return self.fail("create folder", error),
        };
        tracing::info!(folder_id = created.id, parent_id = ?created.parent_id, "folder created");
        self.select_created(Selection::Folder(created.id)).await?;
        Ok(created)
    }

    /// Creates a document in the folder implied by the selection.
    pub async fn create_document(&self, name: Option<String>) -> AppResult<Document> {
        let _guard = self.structure_lock.lock().await;
        let forest = self.forest();
        let folder_id = self.state().selection.context_folder(&forest);
        let Some(folder_id) = folder_id else {
            let error = AppError::Invalid("select a folder before creating a document".to_string());
            return self.fail("create document", error);
        };
        self.insert_document(folder_id, name).await
    }

    pub async fn create_document_in(
        &self,
        folder_id: EntityId,
        name: Option<String>,
    ) -> AppResult<Document> {
        let _guard = self.structure_lock.lock().await;
        self.insert_document(folder_id, name).await
    }

    /// Caller holds the structure lock.
    async fn insert_document(
        &self,
        folder_id: EntityId,
        name: Option<String>,
    ) -> AppResult<Document> {
        let name = non_blank(name.as_deref(), &self.config.default_document_name);
        let forest = self.forest();
        if !forest.contains_folder(folder_id) {
            return self.fail(
                "create document",
                AppError::NotFound(format!("folder {folder_id}")),
            );
        }
        let after_sort_order = self
            .selection()
            .document_id()
            .and_then(|id| forest.document(id))
            .filter(|document| document.folder_id == folder_id)
            .and_then(|document| document.sort_order);
        let request = DocumentCreate {
            project_id: self.project_id,
            folder_id,
            name,
            after_sort_order,
        };
        let created = match self.remote.create_document(request).await {
            Ok(document) => document,
            Err(error) => return self.fail("create document", error),
        };
        tracing::info!(document_id = created.id, folder_id, "document created");
        self.sync
            .hydrate(FieldKey::DocumentBody(created.id), &created.text);
        self.sync
            .hydrate(FieldKey::DocumentNotes(created.id), &created.notes);
        self.state().hierarchy.expand(folder_id);
        self.select_created(Selection::Document(created.id)).await?;
        Ok(created)
    }

    /// Reloads and selects a freshly created node. Not finding it is a logic
    /// fault: the selection stays where it was.
    async fn select_created(&self, created: Selection) -> AppResult<()> {
        let forest = match self.reload_forest().await {
            Ok(forest) => forest,
            Err(error) => return self.fail("reload hierarchy", error),
        };
        if rebind(created, &forest) != created {
            tracing::error!(created = ?created, "created entity missing from reloaded hierarchy");
            let error = AppError::Inconsistent(format!("{created:?} not found after creation"));
            return self.fail("locate created entity", error);
        }
        self.set_selection(created).await;
        Ok(())
    }

    pub async fn delete(&self, target: Selection) -> AppResult<()> {
        match target {
            Selection::Document(id) => self.delete_document(id).await,
            Selection::Folder(id) => self.delete_folder(id).await,
            Selection::None => Ok(()),
        }
    }

    pub async fn delete_document(&self, document_id: EntityId) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        let before = self.forest();
        if !before.contains_document(document_id) {
            return self.fail(
                "delete document",
                AppError::NotFound(format!("document {document_id}")),
            );
        }
        let current = self.selection();
        let next = if current == Selection::Document(document_id) {
            neighbor_for_removal(&before, current)
        } else {
            current
        };

        if let Err(error) = self.remote.delete_document(document_id).await {
            return self.fail("delete document", error);
        }
        tracing::info!(document_id, "document deleted");
        self.forget_owned(&[], &[document_id]);
        self.finish_removal(next).await
    }

    /// Deletes the folder with everything nested in it.
    pub async fn delete_folder(&self, folder_id: EntityId) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        let before = self.forest();
        if !before.contains_folder(folder_id) {
            return self.fail("delete folder", AppError::NotFound(format!("folder {folder_id}")));
        }
        let folder_ids = before.folder_ids_within(folder_id);
        let document_ids = before.document_ids_within(folder_id);
        let current = self.selection();
        let removes_selection = match current {
            Selection::Folder(id) => folder_ids.contains(&id),
            Selection::Document(id) => document_ids.contains(&id),
            Selection::None => false,
        };
        let next = if removes_selection {
            neighbor_for_removal(&before, Selection::Folder(folder_id))
        } else {
            current
        };

        if let Err(error) = self.remote.delete_folder(folder_id).await {
            return self.fail("delete folder", error);
        }
        tracing::info!(
            folder_id,
            folders = folder_ids.len(),
            documents = document_ids.len(),
            "folder deleted"
        );
        self.forget_owned(&folder_ids, &document_ids);
        self.finish_removal(next).await
    }

    async fn finish_removal(&self, next: Selection) -> AppResult<()> {
        let forest = match self.reload_forest().await {
            Ok(forest) => forest,
            Err(error) => return self.fail("reload hierarchy", error),
        };
        self.set_selection(rebind(next, &forest)).await;
        Ok(())
    }

    /// Drops cached fields, drafts and shelf entries of removed entities.
    fn forget_owned(&self, folder_ids: &[EntityId], document_ids: &[EntityId]) {
        let owned_draft = |draft: &DraftRef| {
            let owner = self
                .sync
                .draft_metadata(draft)
                .map(|metadata| metadata.owner_id);
            match (draft.kind, owner) {
                (DraftKind::Document, Some(owner)) => document_ids.contains(&owner),
                (DraftKind::Folder, Some(owner)) => folder_ids.contains(&owner),
                _ => false,
            }
        };
        let removed_drafts: Vec<DraftRef> = {
            let state = self.state();
            state
                .shelves
                .values()
                .flat_map(|shelf| shelf.drafts.iter().map(Draft::draft_ref))
                .filter(|draft| owned_draft(draft))
                .collect()
        };

        self.sync.forget_matching(|key| match key {
            FieldKey::DocumentBody(id) | FieldKey::DocumentNotes(id) => document_ids.contains(id),
            FieldKey::FolderNotes(id) => folder_ids.contains(id),
            FieldKey::DraftContent(draft) => owned_draft(draft),
            FieldKey::ProjectNotes(_) => false,
        });

        let active = {
            let mut state = self.state();
            for draft in &removed_drafts {
                state.drafts.forget(*draft);
            }
            for (kind, shelf) in state.shelves.iter_mut() {
                let owner_removed = match (kind, shelf.owner_id) {
                    (DraftKind::Document, Some(owner)) => document_ids.contains(&owner),
                    (DraftKind::Folder, Some(owner)) => folder_ids.contains(&owner),
                    _ => false,
                };
                if owner_removed {
                    *shelf = DraftShelf::default();
                }
            }
            state.drafts.active()
        };
        for draft in &removed_drafts {
            self.sync.forget(&FieldKey::DraftContent(*draft));
        }
        self.signals.emit(Signal::ActiveDraft(active));
    }

    /// Blank names fall back to the configured defaults.
    pub async fn rename(&self, target: Selection, name: &str) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        let result = match target {
            Selection::Document(id) => {
                let name = non_blank(Some(name), &self.config.default_document_name);
                self.remote.rename_document(id, &name).await
            }
            Selection::Folder(id) => {
                let name = non_blank(Some(name), &self.config.default_folder_name);
                self.remote.rename_folder(id, &name).await
            }
            Selection::None => return Ok(()),
        };
        if let Err(error) = result {
            return self.fail("rename", error);
        }
        tracing::info!(target = ?target, "renamed");
        self.reload_and_rebind().await
    }

    pub async fn move_folder(
        &self,
        folder_id: EntityId,
        parent_id: Option<EntityId>,
        position: usize,
    ) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        if let Err(error) = self.remote.move_folder(folder_id, parent_id, position).await {
            return self.fail("move folder", error);
        }
        tracing::info!(folder_id, parent_id = ?parent_id, position, "folder moved");
        self.reload_and_rebind().await
    }

    pub async fn move_document(
        &self,
        document_id: EntityId,
        folder_id: EntityId,
        position: usize,
    ) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        if let Err(error) = self
            .remote
            .move_document(document_id, folder_id, position)
            .await
        {
            return self.fail("move document", error);
        }
        tracing::info!(document_id, folder_id, position, "document moved");
        self.reload_and_rebind().await
    }

    async fn reload_and_rebind(&self) -> AppResult<()> {
        let forest = match self.reload_forest().await {
            Ok(forest) => forest,
            Err(error) => return self.fail("reload hierarchy", error),
        };
        let rebound = rebind(self.selection(), &forest);
        self.set_selection(rebound).await;
        Ok(())
    }

    /// Creates an empty draft for the selected owner of `kind` and makes it
    /// the active draft.
    pub async fn create_draft(&self, kind: DraftKind) -> AppResult<Draft> {
        let _guard = self.structure_lock.lock().await;
        let selection = self.selection();
        let owner_id = match kind {
            DraftKind::Document => selection.document_id(),
            DraftKind::Folder => selection.folder_id(),
            DraftKind::Project => Some(self.project_id),
        };
        let Some(owner_id) = owner_id else {
            let error = AppError::Invalid(format!("no {} selected for a new draft", kind.as_str()));
            return self.fail("create draft", error);
        };
        let request = DraftCreate {
            kind,
            owner_id,
            name: format!("Draft {}", Local::now().format("%H:%M:%S")),
            content: String::new(),
        };
        let created = match self.remote.create_draft(request).await {
            Ok(draft) => draft,
            Err(error) => return self.fail("create draft", error),
        };
        tracing::info!(kind = kind.as_str(), draft_id = created.id, owner_id, "draft created");
        self.sync.remember_draft(created.clone());
        {
            let mut state = self.state();
            let shelf = state.shelves.entry(kind).or_default();
            if shelf.owner_id == Some(owner_id) {
                shelf.drafts.push(created.clone());
            }
        }
        self.activate_draft(created.draft_ref()).await;
        Ok(created)
    }

    /// Drafts are removed from their shelf directly; the hierarchy is not
    /// reloaded.
    pub async fn delete_draft(&self, draft: DraftRef) -> AppResult<()> {
        let _guard = self.structure_lock.lock().await;
        if let Err(error) = self.remote.delete_draft(draft).await {
            return self.fail("delete draft", error);
        }
        tracing::info!(kind = draft.kind.as_str(), draft_id = draft.id, "draft deleted");
        self.sync.forget(&FieldKey::DraftContent(draft));
        let active = {
            let mut state = self.state();
            if let Some(shelf) = state.shelves.get_mut(&draft.kind) {
                shelf.drafts.retain(|stored| stored.draft_ref() != draft);
            }
            state.drafts.forget(draft)
        };
        self.signals.emit(Signal::ActiveDraft(active));
        Ok(())
    }

    pub async fn rename_draft(&self, draft: DraftRef, name: &str) -> AppResult<Draft> {
        let update = DraftUpdate {
            name: Some(name.trim().to_string()),
            content: None,
        };
        let renamed = match self.remote.update_draft(draft, update).await {
            Ok(renamed) => renamed,
            Err(error) => return self.fail("rename draft", error),
        };
        self.sync.remember_draft(renamed.clone());
        if let Some(shelf) = self.state().shelves.get_mut(&draft.kind) {
            for stored in shelf.drafts.iter_mut() {
                if stored.draft_ref() == draft {
                    *stored = renamed.clone();
                }
            }
        }
        Ok(renamed)
    }

    /// Overwrites the owning document's body with a document draft. The
    /// body is written through the edit pipeline, so the new text replaces a
    /// pending body edit and lands after any body write already in flight.
    pub async fn restore_draft_to_document(&self, draft: DraftRef) -> AppResult<Document> {
        let _guard = self.structure_lock.lock().await;
        if draft.kind != DraftKind::Document {
            let error = AppError::Invalid(format!(
                "{} drafts cannot be restored to a document",
                draft.kind.as_str()
            ));
            return self.fail("restore draft", error);
        }
        let draft_key = FieldKey::DraftContent(draft);
        self.sync.commit_now(draft_key).await;

        let Some(owner_id) = self.sync.draft_metadata(&draft).map(|meta| meta.owner_id) else {
            return self.fail("restore draft", AppError::NotFound(format!("draft {}", draft.id)));
        };
        let Some(mut document) = self.forest().document(owner_id).cloned() else {
            return self.fail("restore draft", AppError::NotFound(format!("document {owner_id}")));
        };
        let content = self.sync.value(&draft_key).unwrap_or_default();

        let body = FieldKey::DocumentBody(owner_id);
        self.sync.edit(body, &content, None);
        self.sync.commit_now(body).await;
        if self.sync.has_pending_edit(&body) && !self.sync.is_in_flight(&body) {
            let error = AppError::Remote(format!("document {owner_id} body was not saved"));
            return self.fail("restore draft", error);
        }
        tracing::info!(draft_id = draft.id, document_id = owner_id, "draft restored to document");
        document.text = content;
        Ok(document)
    }

    /// A click on an inactive draft activates it. A click on the active one
    /// deactivates it after the rename grace period, unless a second click
    /// turns it into a rename.
    pub async fn click_draft(&self, draft: DraftRef) -> DraftClick {
        let previous = self.active_drafts().current();
        let clicked_at = Instant::now();
        let (click, active) = {
            let mut state = self.state();
            let click = state.drafts.click(draft, clicked_at);
            (click, state.drafts.active())
        };
        match click {
            DraftClick::Activated(_) => {
                if let Some(previous) = previous.filter(|previous| *previous != draft) {
                    self.sync.commit_now(FieldKey::DraftContent(previous)).await;
                }
                self.signals.emit(Signal::ActiveDraft(active));
            }
            DraftClick::AwaitingSecondClick(_) => {
                let this = self.this.clone();
                let settle_at = clicked_at + self.config.rename_grace();
                tokio::spawn(async move {
                    tokio::time::sleep_until(settle_at).await;
                    if let Some(workspace) = this.upgrade() {
                        workspace.settle_click().await;
                    }
                });
            }
            DraftClick::Rename(_) => {}
        }
        click
    }

    async fn settle_click(&self) {
        let (settled, active) = {
            let mut state = self.state();
            let settled = state.drafts.settle(Instant::now());
            (settled, state.drafts.active())
        };
        if let Some(draft) = settled {
            self.sync.commit_now(FieldKey::DraftContent(draft)).await;
            self.signals.emit(Signal::ActiveDraft(active));
        }
    }

    pub async fn activate_draft(&self, draft: DraftRef) -> ActiveDrafts {
        let previous = self.active_drafts().current();
        if let Some(previous) = previous.filter(|previous| *previous != draft) {
            self.sync.commit_now(FieldKey::DraftContent(previous)).await;
        }
        let active = self.state().drafts.activate(draft);
        self.signals.emit(Signal::ActiveDraft(active));
        active
    }

    pub async fn deactivate_draft(&self, kind: DraftKind) -> ActiveDrafts {
        let active_id = self.active_drafts().get(kind);
        if let Some(id) = active_id {
            self.sync
                .commit_now(FieldKey::DraftContent(DraftRef::new(kind, id)))
                .await;
        }
        let active = self.state().drafts.deactivate(kind);
        self.signals.emit(Signal::ActiveDraft(active));
        active
    }

    async fn reload_forest(&self) -> AppResult<Arc<Forest>> {
        let folders = self.remote.list_folders(self.project_id).await?;
        let documents = self.remote.list_documents(self.project_id).await?;
        for folder in &folders {
            self.sync
                .hydrate_missing(FieldKey::FolderNotes(folder.id), &folder.notes);
        }
        for document in &documents {
            self.sync
                .hydrate_missing(FieldKey::DocumentBody(document.id), &document.text);
            self.sync
                .hydrate_missing(FieldKey::DocumentNotes(document.id), &document.notes);
        }
        let forest = self.state().hierarchy.rebuild(folders, documents);
        self.signals.emit(Signal::Hierarchy(forest.clone()));
        Ok(forest)
    }

    async fn set_selection(&self, selection: Selection) {
        let (previous, outcome) = {
            let mut state = self.state();
            let previous = state.selection.current();
            (previous, state.selection.set(selection))
        };
        match outcome {
            SelectOutcome::Unchanged => {
                save_persisted(&self.mirror, self.project_id, selection);
                self.signals.emit(Signal::Selection(selection));
            }
            _ => self.selection_changed(previous, selection).await,
        }
    }

    async fn selection_changed(&self, previous: Selection, selection: Selection) {
        self.commit_entity(previous).await;
        save_persisted(&self.mirror, self.project_id, selection);
        self.signals.emit(Signal::Selection(selection));

        match selection {
            Selection::Document(id) => {
                self.refresh_document(id).await;
                if let Err(error) = self.load_shelf(DraftKind::Document, id).await {
                    tracing::warn!(document_id = id, error = %error, "failed to list document drafts");
                }
            }
            Selection::Folder(id) => {
                if let Err(error) = self.load_shelf(DraftKind::Folder, id).await {
                    tracing::warn!(folder_id = id, error = %error, "failed to list folder drafts");
                }
            }
            Selection::None => {}
        }
        self.reconcile_active_drafts(selection);
    }

    /// Deliberate reload of the selected document. A pending local edit keeps
    /// precedence over what comes back.
    async fn refresh_document(&self, document_id: EntityId) {
        match self.remote.get_document(document_id).await {
            Ok(Some(document)) => {
                self.sync
                    .hydrate(FieldKey::DocumentBody(document.id), &document.text);
                self.sync
                    .hydrate(FieldKey::DocumentNotes(document.id), &document.notes);
            }
            Ok(None) => tracing::warn!(document_id, "selected document no longer exists"),
            Err(error) => {
                tracing::warn!(document_id, error = %error, "failed to refresh selected document")
            }
        }
    }

    async fn load_shelf(&self, kind: DraftKind, owner_id: EntityId) -> AppResult<()> {
        let drafts = self.remote.list_drafts(kind, owner_id).await?;
        for draft in &drafts {
            self.sync.remember_draft(draft.clone());
        }
        self.state().shelves.insert(
            kind,
            DraftShelf {
                owner_id: Some(owner_id),
                drafts,
            },
        );
        Ok(())
    }

    /// Document and folder drafts stay active only while their owner is
    /// selected. A project draft must be on this project's loaded shelf.
    fn reconcile_active_drafts(&self, selection: Selection) {
        let changed = {
            let mut state = self.state();
            let before = state.drafts.active();
            for kind in DraftKind::ALL {
                let Some(active_id) = before.get(kind) else {
                    continue;
                };
                let owner = match kind {
                    DraftKind::Document => selection.document_id(),
                    DraftKind::Folder => selection.folder_id(),
                    DraftKind::Project => {
                        let loaded = state
                            .shelves
                            .get(&kind)
                            .is_some_and(|shelf| shelf.owner_id.is_some());
                        if !loaded {
                            continue;
                        }
                        Some(self.project_id)
                    }
                };
                let on_shelf = state.shelves.get(&kind).is_some_and(|shelf| {
                    shelf.owner_id.is_some()
                        && shelf.owner_id == owner
                        && shelf.drafts.iter().any(|draft| draft.id == active_id)
                });
                if !on_shelf {
                    state.drafts.deactivate(kind);
                }
            }
            let after = state.drafts.active();
            (after != before).then_some(after)
        };
        if let Some(active) = changed {
            self.signals.emit(Signal::ActiveDraft(active));
        }
    }

    /// Navigation away from an entity commits its pending fields.
    async fn commit_entity(&self, previous: Selection) {
        let keys: Vec<FieldKey> = self
            .sync
            .pending_keys()
            .into_iter()
            .filter(|key| match (previous, key) {
                (Selection::Document(id), FieldKey::DraftContent(draft)) => {
                    draft.kind == DraftKind::Document
                        && self
                            .sync
                            .draft_metadata(draft)
                            .is_some_and(|metadata| metadata.owner_id == id)
                }
                (Selection::Document(id), key) => key.belongs_to_document(id),
                (Selection::Folder(id), FieldKey::FolderNotes(folder_id)) => *folder_id == id,
                (Selection::Folder(id), FieldKey::DraftContent(draft)) => {
                    draft.kind == DraftKind::Folder
                        && self
                            .sync
                            .draft_metadata(draft)
                            .is_some_and(|metadata| metadata.owner_id == id)
                }
                _ => false,
            })
            .collect();
        for key in keys {
            self.sync.commit_now(key).await;
        }
    }

    fn fail<T>(&self, action: &str, error: AppError) -> AppResult<T> {
        tracing::warn!(action, error = %error, "workspace mutation failed");
        self.signals
            .notice(format!("Failed to {action}: {}", to_client_error(&error)));
        Err(error)
    }
}

impl std::fmt::Debug for ProjectWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWorkspace")
            .field("project_id", &self.project_id)
            .field("selection", &self.selection())
            .finish()
    }
}

fn non_blank(name: Option<&str>, fallback: &str) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => fallback.to_string(),
    }
}
