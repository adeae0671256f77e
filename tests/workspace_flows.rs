use async_trait::async_trait;
use cora_core_lib::errors::AppResult;
use cora_core_lib::models::{
    Document, DocumentCreate, Draft, DraftCreate, DraftKind, DraftRef, DraftUpdate, EntityId, Folder,
    FolderCreate, Project, SyncStatus,
};
use cora_core_lib::{
    AppError, DraftClick, FieldKey, KeyValueStore, MemoryKvStore, MemoryRemoteStore, ProjectWorkspace,
    RemoteStore, Selection, Signal, SyncConfig,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

struct Seed {
    remote: Arc<MemoryRemoteStore>,
    kv: Arc<MemoryKvStore>,
    part_one: EntityId,
    part_two: EntityId,
    chapters: [EntityId; 3],
}

fn seed() -> Seed {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.insert_project(1, "The Long Winter").expect("project");
    let part_one = remote.insert_folder(1, None, "Part One").expect("folder").id;
    let part_two = remote.insert_folder(1, None, "Part Two").expect("folder").id;
    let chapters = [
        remote
            .insert_document(1, part_one, "Chapter 1", "Snow fell.")
            .expect("doc")
            .id,
        remote
            .insert_document(1, part_one, "Chapter 2", "")
            .expect("doc")
            .id,
        remote
            .insert_document(1, part_one, "Chapter 3", "")
            .expect("doc")
            .id,
    ];
    Seed {
        remote,
        kv: Arc::new(MemoryKvStore::new()),
        part_one,
        part_two,
        chapters,
    }
}

async fn open(seed: &Seed) -> Arc<ProjectWorkspace> {
    let workspace = ProjectWorkspace::new(
        1,
        seed.remote.clone(),
        seed.kv.clone(),
        SyncConfig::default(),
    );
    workspace.load().await.expect("load");
    workspace
}

#[tokio::test(start_paused = true)]
async fn rapid_typing_is_written_once_with_the_final_text() {
    let seed = seed();
    let workspace = open(&seed).await;
    let key = FieldKey::DocumentBody(seed.chapters[0]);

    let mut text = String::from("Snow fell.");
    for word in [" The", " wind", " rose."] {
        text.push_str(word);
        workspace.field_changed(key, &text, Some(text.len()));
        assert_eq!(workspace.field_value(&key).as_deref(), Some(text.as_str()));
        assert_eq!(workspace.sync_status(&key), Some(SyncStatus::Pending));
        sleep(Duration::from_millis(300)).await;
    }
    sleep(Duration::from_millis(2_000)).await;

    let writes = seed.remote.calls_for("update_document_text");
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].payload.as_deref(), Some("Snow fell. The wind rose."));
    assert_eq!(workspace.sync_status(&key), Some(SyncStatus::Synced));
    assert!(seed
        .kv
        .get(&key.storage_key())
        .expect("mirror")
        .is_none());

    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(workspace.sync_status(&key), None);
    assert_eq!(workspace.word_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn notes_and_draft_content_use_their_own_windows() {
    let seed = seed();
    let workspace = open(&seed).await;
    let draft = workspace
        .create_draft(DraftKind::Project)
        .await
        .expect("draft");
    seed.remote.clear_calls();

    let start = Instant::now();
    workspace.field_changed(FieldKey::FolderNotes(seed.part_one), "themes: cold", None);
    workspace.field_changed(FieldKey::DraftContent(draft.draft_ref()), "what if spring", None);
    sleep(Duration::from_millis(2_100)).await;

    let notes = seed.remote.calls_for("update_folder_notes");
    let drafts = seed.remote.calls_for("update_draft");
    assert_eq!(notes.len(), 1);
    assert_eq!(drafts.len(), 1);
    let notes_delay = notes[0].issued_at - start;
    let draft_delay = drafts[0].issued_at - start;
    assert!(notes_delay >= Duration::from_millis(2_000) && notes_delay < Duration::from_millis(2_050));
    assert!(draft_delay >= Duration::from_millis(500) && draft_delay < Duration::from_millis(550));
}

#[tokio::test(start_paused = true)]
async fn created_document_is_selected_from_the_rebuilt_tree() {
    let seed = seed();
    let workspace = open(&seed).await;
    assert_eq!(workspace.selection(), Selection::Document(seed.chapters[0]));
    workspace
        .select_document(seed.chapters[1])
        .await
        .expect("select");

    let created = workspace.create_document(None).await.expect("create");
    assert_eq!(created.name, "Untitled Document");
    assert_eq!(workspace.selection(), Selection::Document(created.id));

    let forest = workspace.forest();
    assert_eq!(
        forest.document(created.id).map(|document| document.folder_id),
        Some(seed.part_one)
    );
    assert_eq!(
        forest.document_siblings(created.id),
        vec![seed.chapters[0], seed.chapters[1], created.id, seed.chapters[2]]
    );
    assert!(forest
        .folder(seed.part_one)
        .map(|node| node.expanded)
        .unwrap_or(false));
}

#[tokio::test(start_paused = true)]
async fn creating_a_document_needs_a_folder_context() {
    let seed = seed();
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.insert_project(1, "Empty").expect("project");
    let workspace = ProjectWorkspace::new(1, remote, seed.kv.clone(), SyncConfig::default());
    workspace.load().await.expect("load");
    assert_eq!(workspace.selection(), Selection::None);

    let error = workspace.create_document(None).await.expect_err("no folder");
    assert!(matches!(error, AppError::Invalid(_)));

    let folder = workspace.create_folder(Some("   ".to_string())).await.expect("folder");
    assert_eq!(folder.name, "New Folder");
    assert_eq!(workspace.selection(), Selection::Folder(folder.id));
    let document = workspace.create_document(None).await.expect("document");
    assert_eq!(document.folder_id, folder.id);
}

#[tokio::test(start_paused = true)]
async fn deletion_selects_previous_then_next_then_parent() {
    let seed = seed();
    let workspace = open(&seed).await;
    let [first, second, third] = seed.chapters;

    workspace.select_document(second).await.expect("select");
    workspace.delete_document(second).await.expect("delete");
    assert_eq!(workspace.selection(), Selection::Document(first));

    workspace.delete_document(first).await.expect("delete");
    assert_eq!(workspace.selection(), Selection::Document(third));

    workspace.delete_document(third).await.expect("delete");
    assert_eq!(workspace.selection(), Selection::Folder(seed.part_one));
    assert!(workspace.forest().folder_documents(seed.part_one).is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleting_a_folder_drops_pending_edits_inside_it() {
    let seed = seed();
    let workspace = open(&seed).await;
    let key = FieldKey::DocumentBody(seed.chapters[0]);
    workspace.field_changed(key, "never mind", None);

    workspace.delete_folder(seed.part_one).await.expect("delete");
    assert_eq!(workspace.selection(), Selection::Folder(seed.part_two));
    assert_eq!(workspace.field_value(&key), None);
    assert!(seed.kv.get(&key.storage_key()).expect("mirror").is_none());

    sleep(Duration::from_millis(3_000)).await;
    assert!(seed.remote.calls_for("update_document_text").is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_mutation_leaves_tree_and_selection_alone() {
    let seed = seed();
    let workspace = open(&seed).await;
    let before = workspace.forest();
    let selected = workspace.selection();
    let mut signals = workspace.subscribe();

    seed.remote.set_fail_structure(true);
    let error = workspace.create_folder(None).await.expect_err("rejected");
    assert!(error.is_transient());
    workspace
        .delete_document(seed.chapters[0])
        .await
        .expect_err("rejected");

    assert_eq!(workspace.selection(), selected);
    assert!(Arc::ptr_eq(&before, &workspace.forest()));
    let mut notices = Vec::new();
    while let Ok(envelope) = signals.try_recv() {
        if let Signal::Notice(message) = envelope.signal {
            notices.push(message);
        }
    }
    assert_eq!(notices.len(), 2);
    assert!(notices[0].starts_with("Failed to create folder"));
}

#[tokio::test(start_paused = true)]
async fn reselecting_a_folder_toggles_expansion_only() {
    let seed = seed();
    let workspace = open(&seed).await;
    let expanded = |workspace: &ProjectWorkspace| {
        workspace
            .forest()
            .folder(seed.part_two)
            .map(|node| node.expanded)
            .unwrap_or(false)
    };

    workspace.select_folder(seed.part_two).await.expect("select");
    assert!(!expanded(&workspace));
    workspace.select_folder(seed.part_two).await.expect("reselect");
    assert_eq!(workspace.selection(), Selection::Folder(seed.part_two));
    assert!(expanded(&workspace));
    workspace.select_folder(seed.part_two).await.expect("reselect");
    assert!(!expanded(&workspace));
}

#[tokio::test(start_paused = true)]
async fn activating_a_project_draft_clears_the_document_draft() {
    let seed = seed();
    let workspace = open(&seed).await;

    let document_draft = workspace
        .create_draft(DraftKind::Document)
        .await
        .expect("document draft");
    assert_eq!(workspace.active_drafts().document, Some(document_draft.id));
    assert_eq!(
        seed.kv.get("cora-project:1:active-draft:doc").expect("marker"),
        Some(document_draft.id.to_string())
    );

    let project_draft = workspace
        .create_draft(DraftKind::Project)
        .await
        .expect("project draft");
    let active = workspace.active_drafts();
    assert_eq!(active.document, None);
    assert_eq!(active.project, Some(project_draft.id));
    assert!(seed.kv.get("cora-project:1:active-draft:doc").expect("marker").is_none());
}

#[tokio::test(start_paused = true)]
async fn clicking_the_active_draft_deactivates_unless_double_clicked() {
    let seed = seed();
    let workspace = open(&seed).await;
    let draft = workspace
        .create_draft(DraftKind::Document)
        .await
        .expect("draft")
        .draft_ref();

    assert_eq!(
        workspace.click_draft(draft).await,
        DraftClick::AwaitingSecondClick(draft)
    );
    sleep(Duration::from_millis(250)).await;
    assert_eq!(workspace.active_drafts().document, None);

    assert_eq!(workspace.click_draft(draft).await, DraftClick::Activated(draft));
    workspace.click_draft(draft).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(workspace.click_draft(draft).await, DraftClick::Rename(draft));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(workspace.active_drafts().document, Some(draft.id));
}

#[tokio::test(start_paused = true)]
async fn draft_shelf_shows_unsynced_content_and_deleted_drafts_disappear() {
    let seed = seed();
    let workspace = open(&seed).await;
    let draft = workspace
        .create_draft(DraftKind::Document)
        .await
        .expect("draft");
    assert!(draft.name.starts_with("Draft "));
    assert!(draft.content.is_empty());

    let key = FieldKey::DraftContent(draft.draft_ref());
    workspace.field_changed(key, "an alternate ending", None);
    let shelf = workspace.drafts(DraftKind::Document);
    assert_eq!(shelf.len(), 1);
    assert_eq!(shelf[0].content, "an alternate ending");

    workspace.delete_draft(draft.draft_ref()).await.expect("delete");
    assert!(workspace.drafts(DraftKind::Document).is_empty());
    assert_eq!(workspace.active_drafts().document, None);
    assert_eq!(workspace.field_value(&key), None);
}

#[tokio::test(start_paused = true)]
async fn pending_edit_wins_over_a_deliberate_reload() {
    let seed = seed();
    let workspace = open(&seed).await;
    let key = FieldKey::DocumentBody(seed.chapters[0]);
    seed.remote.set_fail_field_writes(true);

    workspace.field_changed(key, "Snow fell hard.", None);
    workspace
        .select_document(seed.chapters[1])
        .await
        .expect("select away");
    assert_eq!(workspace.sync_status(&key), Some(SyncStatus::Pending));

    workspace
        .select_document(seed.chapters[0])
        .await
        .expect("select back");
    assert_eq!(workspace.field_value(&key).as_deref(), Some("Snow fell hard."));
}

#[tokio::test(start_paused = true)]
async fn unsynced_edits_and_selection_survive_a_restart() {
    let seed = seed();
    let key = FieldKey::DocumentNotes(seed.chapters[2]);
    {
        let workspace = open(&seed).await;
        workspace
            .select_document(seed.chapters[2])
            .await
            .expect("select");
        seed.remote.set_fail_field_writes(true);
        workspace.field_changed(key, "move the storm earlier", None);
        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(workspace.sync_status(&key), Some(SyncStatus::Pending));
    }

    seed.remote.set_fail_field_writes(false);
    let workspace = open(&seed).await;
    assert_eq!(workspace.selection(), Selection::Document(seed.chapters[2]));
    assert_eq!(
        workspace.field_value(&key).as_deref(),
        Some("move the storm earlier")
    );
    assert_eq!(workspace.sync_status(&key), Some(SyncStatus::Pending));

    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(
        seed.remote
            .document(seed.chapters[2])
            .map(|document| document.notes),
        Some("move the storm earlier".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn suspend_flushes_everything_pending() {
    let seed = seed();
    let workspace = open(&seed).await;
    workspace.field_changed(FieldKey::ProjectNotes(1), "outline v2", None);
    workspace.field_changed(FieldKey::FolderNotes(seed.part_two), "epilogue?", None);

    workspace.suspend().await;
    assert_eq!(
        seed.remote.project(1).map(|project| project.notes),
        Some("outline v2".to_string())
    );
    assert_eq!(
        seed.remote.folder(seed.part_two).map(|folder| folder.notes),
        Some("epilogue?".to_string())
    );
}

/// Hides documents with a given name from listings, so a successful create
/// cannot be found after the reload.
struct HidingRemote {
    inner: Arc<MemoryRemoteStore>,
    hidden_name: &'static str,
}

#[async_trait]
impl RemoteStore for HidingRemote {
    async fn get_project(&self, project_id: EntityId) -> AppResult<Project> {
        self.inner.get_project(project_id).await
    }
    async fn update_project_notes(&self, project_id: EntityId, notes: &str) -> AppResult<()> {
        self.inner.update_project_notes(project_id, notes).await
    }
    async fn list_folders(&self, project_id: EntityId) -> AppResult<Vec<Folder>> {
        self.inner.list_folders(project_id).await
    }
    async fn create_folder(&self, request: FolderCreate) -> AppResult<Folder> {
        self.inner.create_folder(request).await
    }
    async fn rename_folder(&self, folder_id: EntityId, name: &str) -> AppResult<()> {
        self.inner.rename_folder(folder_id, name).await
    }
    async fn move_folder(
        &self,
        folder_id: EntityId,
        parent_id: Option<EntityId>,
        position: usize,
    ) -> AppResult<()> {
        self.inner.move_folder(folder_id, parent_id, position).await
    }
    async fn delete_folder(&self, folder_id: EntityId) -> AppResult<()> {
        self.inner.delete_folder(folder_id).await
    }
    async fn update_folder_notes(&self, folder_id: EntityId, notes: &str) -> AppResult<()> {
        self.inner.update_folder_notes(folder_id, notes).await
    }
    async fn list_documents(&self, project_id: EntityId) -> AppResult<Vec<Document>> {
        let mut documents = self.inner.list_documents(project_id).await?;
        documents.retain(|document| document.name != self.hidden_name);
        Ok(documents)
    }
    async fn get_document(&self, document_id: EntityId) -> AppResult<Option<Document>> {
        self.inner.get_document(document_id).await
    }
    async fn create_document(&self, request: DocumentCreate) -> AppResult<Document> {
        self.inner.create_document(request).await
    }
    async fn rename_document(&self, document_id: EntityId, name: &str) -> AppResult<()> {
        self.inner.rename_document(document_id, name).await
    }
    async fn move_document(
        &self,
        document_id: EntityId,
        folder_id: EntityId,
        position: usize,
    ) -> AppResult<()> {
        self.inner.move_document(document_id, folder_id, position).await
    }
    async fn delete_document(&self, document_id: EntityId) -> AppResult<()> {
        self.inner.delete_document(document_id).await
    }
    async fn update_document_text(&self, document_id: EntityId, text: &str) -> AppResult<()> {
        self.inner.update_document_text(document_id, text).await
    }
    async fn update_document_notes(&self, document_id: EntityId, notes: &str) -> AppResult<()> {
        self.inner.update_document_notes(document_id, notes).await
    }
    async fn list_drafts(&self, kind: DraftKind, owner_id: EntityId) -> AppResult<Vec<Draft>> {
        self.inner.list_drafts(kind, owner_id).await
    }
    async fn create_draft(&self, request: DraftCreate) -> AppResult<Draft> {
        self.inner.create_draft(request).await
    }
    async fn update_draft(&self, draft: DraftRef, update: DraftUpdate) -> AppResult<Draft> {
        self.inner.update_draft(draft, update).await
    }
    async fn delete_draft(&self, draft: DraftRef) -> AppResult<()> {
        self.inner.delete_draft(draft).await
    }
}

#[tokio::test(start_paused = true)]
async fn create_that_cannot_be_located_keeps_the_previous_selection() {
    let seed = seed();
    let remote = Arc::new(HidingRemote {
        inner: seed.remote.clone(),
        hidden_name: "Ghost",
    });
    let workspace = ProjectWorkspace::new(1, remote, seed.kv.clone(), SyncConfig::default());
    workspace.load().await.expect("load");
    let selected = workspace.selection();

    let error = workspace
        .create_document_in(seed.part_two, Some("Ghost".to_string()))
        .await
        .expect_err("inconsistent");
    assert!(matches!(error, AppError::Inconsistent(_)));
    assert_eq!(workspace.selection(), selected);
}

#[tokio::test(start_paused = true)]
async fn rename_and_move_keep_the_selection_bound_by_id() {
    let seed = seed();
    let workspace = open(&seed).await;
    workspace
        .select_document(seed.chapters[2])
        .await
        .expect("select");

    workspace
        .rename(Selection::Document(seed.chapters[2]), "")
        .await
        .expect("rename");
    assert_eq!(
        workspace
            .forest()
            .document(seed.chapters[2])
            .map(|document| document.name.clone()),
        Some("Untitled Document".to_string())
    );

    workspace
        .move_document(seed.chapters[2], seed.part_two, 0)
        .await
        .expect("move");
    assert_eq!(workspace.selection(), Selection::Document(seed.chapters[2]));
    assert_eq!(
        workspace.forest().document_folder(seed.chapters[2]),
        Some(seed.part_two)
    );
}

#[tokio::test(start_paused = true)]
async fn active_draft_markers_stay_with_their_project() {
    let seed = seed();
    seed.remote.insert_project(2, "Short Stories").expect("project");
    let first = open(&seed).await;
    let draft = first
        .create_draft(DraftKind::Project)
        .await
        .expect("draft");
    assert_eq!(first.active_drafts().project, Some(draft.id));

    let second = ProjectWorkspace::new(2, seed.remote.clone(), seed.kv.clone(), SyncConfig::default());
    second.load().await.expect("load");
    assert!(second.drafts(DraftKind::Project).is_empty());
    assert_eq!(second.active_drafts().current(), None);

    let reopened = open(&seed).await;
    assert_eq!(reopened.active_drafts().project, Some(draft.id));
}

#[tokio::test(start_paused = true)]
async fn project_draft_missing_from_the_shelf_is_not_restored() {
    let seed = seed();
    seed.kv
        .set("cora-project:1:active-draft:project", "99")
        .expect("marker");
    let workspace = open(&seed).await;
    assert_eq!(workspace.active_drafts().current(), None);
    assert!(seed
        .kv
        .get("cora-project:1:active-draft:project")
        .expect("marker")
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn restoring_a_draft_replaces_the_pending_body_edit() {
    let seed = seed();
    let workspace = open(&seed).await;
    let chapter = seed.chapters[0];
    let draft = workspace
        .create_draft(DraftKind::Document)
        .await
        .expect("draft")
        .draft_ref();
    let body = FieldKey::DocumentBody(chapter);
    workspace.field_changed(FieldKey::DraftContent(draft), "Spring came early.", None);
    workspace.field_changed(body, "Snow fell. Then", None);
    seed.remote.clear_calls();

    let restored = workspace
        .restore_draft_to_document(draft)
        .await
        .expect("restore");
    assert_eq!(restored.id, chapter);
    assert_eq!(restored.text, "Spring came early.");

    let draft_writes = seed.remote.calls_for("update_draft");
    assert_eq!(draft_writes.len(), 1);
    assert_eq!(draft_writes[0].payload.as_deref(), Some("Spring came early."));
    let body_writes = seed.remote.calls_for("update_document_text");
    assert_eq!(body_writes.len(), 1);
    assert_eq!(body_writes[0].payload.as_deref(), Some("Spring came early."));
    assert_eq!(workspace.field_value(&body).as_deref(), Some("Spring came early."));
    assert_eq!(workspace.sync_status(&body), Some(SyncStatus::Synced));

    sleep(Duration::from_millis(3_000)).await;
    assert_eq!(seed.remote.calls_for("update_document_text").len(), 1);
    assert_eq!(
        seed.remote.document(chapter).expect("document").text,
        "Spring came early."
    );
}

#[tokio::test(start_paused = true)]
async fn only_document_drafts_can_be_restored() {
    let seed = seed();
    let workspace = open(&seed).await;
    let draft = workspace
        .create_draft(DraftKind::Project)
        .await
        .expect("draft")
        .draft_ref();
    let error = workspace
        .restore_draft_to_document(draft)
        .await
        .expect_err("project draft");
    assert!(matches!(error, AppError::Invalid(_)));
    assert!(seed.remote.calls_for("update_document_text").is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_document_waits_for_a_delete_before_choosing_its_folder() {
    let seed = seed();
    let workspace = open(&seed).await;
    workspace.select_folder(seed.part_two).await.expect("select");
    seed.remote.set_latency(Some(Duration::from_millis(50)));

    let (deleted, created) = tokio::join!(
        workspace.delete_folder(seed.part_two),
        workspace.create_document(None)
    );
    deleted.expect("delete");
    let created = created.expect("create");
    assert_eq!(created.folder_id, seed.part_one);
    assert_eq!(workspace.selection(), Selection::Document(created.id));
}
