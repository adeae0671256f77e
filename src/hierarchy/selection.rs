use super::Forest;
use crate::keys::selection_key;
use crate::kv::LocalMirror;
use crate::models::{EntityId, NodeKind};
use serde::{Deserialize, Serialize};

/// The selected hierarchy node, held by id only. Whatever node it names is
/// looked up in the current forest when needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum Selection {
    #[default]
    None,
    Document(EntityId),
    Folder(EntityId),
}

impl Selection {
    pub fn from_node(kind: NodeKind, id: EntityId) -> Self {
        match kind {
            NodeKind::Document => Self::Document(id),
            NodeKind::Folder => Self::Folder(id),
        }
    }

    pub fn document_id(&self) -> Option<EntityId> {
        match self {
            Self::Document(id) => Some(*id),
            _ => None,
        }
    }

    pub fn folder_id(&self) -> Option<EntityId> {
        match self {
            Self::Folder(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// What selecting a node did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Changed,
    /// The same folder was selected again; its expansion should be toggled.
    Reselected,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    current: Selection,
}

impl SelectionState {
    pub fn new(current: Selection) -> Self {
        Self { current }
    }

    pub fn current(&self) -> Selection {
        self.current
    }

    pub fn select_document(&mut self, document_id: EntityId) -> SelectOutcome {
        self.replace(Selection::Document(document_id))
    }

    pub fn select_folder(&mut self, folder_id: EntityId) -> SelectOutcome {
        if self.current == Selection::Folder(folder_id) {
            return SelectOutcome::Reselected;
        }
        self.replace(Selection::Folder(folder_id))
    }

    pub fn set(&mut self, selection: Selection) -> SelectOutcome {
        self.replace(selection)
    }

    pub fn clear(&mut self) -> SelectOutcome {
        self.replace(Selection::None)
    }

    fn replace(&mut self, selection: Selection) -> SelectOutcome {
        if self.current == selection {
            return SelectOutcome::Unchanged;
        }
        self.current = selection;
        SelectOutcome::Changed
    }

    /// The folder new documents go into: the selected folder, or the folder
    /// of the selected document.
    pub fn context_folder(&self, forest: &Forest) -> Option<EntityId> {
        match self.current {
            Selection::Folder(id) if forest.contains_folder(id) => Some(id),
            Selection::Document(id) => forest.document_folder(id),
            _ => None,
        }
    }
}

/// Re-resolves a selection against a freshly built forest.
pub fn rebind(selection: Selection, forest: &Forest) -> Selection {
    match selection {
        Selection::Document(id) if forest.contains_document(id) => selection,
        Selection::Folder(id) if forest.contains_folder(id) => selection,
        _ => Selection::None,
    }
}

/// Picks what to select once `removed` is gone, using the forest from before
/// the removal: previous sibling, else next sibling, else the parent folder.
pub fn neighbor_for_removal(forest: &Forest, removed: Selection) -> Selection {
    let (siblings, id, parent, wrap): (Vec<EntityId>, EntityId, Option<EntityId>, fn(EntityId) -> Selection) =
        match removed {
            Selection::None => return Selection::None,
            Selection::Document(id) => (
                forest.document_siblings(id),
                id,
                forest.document_folder(id),
                Selection::Document,
            ),
            Selection::Folder(id) => (
                forest.folder_siblings(id),
                id,
                forest.folder_parent(id),
                Selection::Folder,
            ),
        };
    if let Some(position) = siblings.iter().position(|sibling| *sibling == id) {
        if position > 0 {
            return wrap(siblings[position - 1]);
        }
        if let Some(next) = siblings.get(position + 1) {
            return wrap(*next);
        }
    }
    parent.map(Selection::Folder).unwrap_or_default()
}

/// First thing to select after a project loads: the remembered selection if
/// it still exists, else the first document, else the first folder.
pub fn initial_selection(remembered: Option<Selection>, forest: &Forest) -> Selection {
    if let Some(selection) = remembered.map(|selection| rebind(selection, forest)) {
        if !selection.is_none() {
            return selection;
        }
    }
    if let Some(document) = forest.first_document() {
        return Selection::Document(document.id);
    }
    forest
        .first_folder()
        .map(|node| Selection::Folder(node.id()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSelection {
    project_id: EntityId,
    doc_id: Option<EntityId>,
    group_id: Option<EntityId>,
}

pub fn load_persisted(mirror: &LocalMirror, project_id: EntityId) -> Option<Selection> {
    let persisted: PersistedSelection = mirror.load_json(&selection_key(project_id))?;
    if persisted.project_id != project_id {
        return None;
    }
    match (persisted.doc_id, persisted.group_id) {
        (Some(doc_id), _) => Some(Selection::Document(doc_id)),
        (None, Some(group_id)) => Some(Selection::Folder(group_id)),
        (None, None) => None,
    }
}

pub fn save_persisted(mirror: &LocalMirror, project_id: EntityId, selection: Selection) {
    let key = selection_key(project_id);
    if selection.is_none() {
        mirror.remove(&key);
        return;
    }
    mirror.save_json(
        &key,
        &PersistedSelection {
            project_id,
            doc_id: selection.document_id(),
            group_id: selection.folder_id(),
        },
    );
}
