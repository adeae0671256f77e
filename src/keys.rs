use crate::config::SyncConfig;
use crate::models::{DraftKind, DraftRef, EntityId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tokio::time::Duration;

pub const FIELD_KEY_PREFIX: &str = "cora-field:";

static FIELD_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^cora-field:(doc-text|doc-notes|folder-notes|project-notes|draft:(doc|folder|project)):(\d+)$")
        .expect("valid field key regex")
});

/// One editable text field. Every field that can be typed into has exactly one
/// key, and the key's storage form is namespaced so unrelated fields never
/// collide in the shared local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKey {
    DocumentBody(EntityId),
    DocumentNotes(EntityId),
    FolderNotes(EntityId),
    ProjectNotes(EntityId),
    DraftContent(DraftRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayClass {
    Long,
    Short,
}

impl DelayClass {
    pub fn window(self, config: &SyncConfig) -> Duration {
        match self {
            Self::Long => config.long_window(),
            Self::Short => config.short_window(),
        }
    }
}

impl FieldKey {
    pub fn draft(kind: DraftKind, id: EntityId) -> Self {
        Self::DraftContent(DraftRef::new(kind, id))
    }

    pub fn storage_key(&self) -> String {
        match self {
            Self::DocumentBody(id) => format!("{FIELD_KEY_PREFIX}doc-text:{id}"),
            Self::DocumentNotes(id) => format!("{FIELD_KEY_PREFIX}doc-notes:{id}"),
            Self::FolderNotes(id) => format!("{FIELD_KEY_PREFIX}folder-notes:{id}"),
            Self::ProjectNotes(id) => format!("{FIELD_KEY_PREFIX}project-notes:{id}"),
            Self::DraftContent(draft) => {
                format!("{FIELD_KEY_PREFIX}draft:{}:{}", draft.kind.as_str(), draft.id)
            }
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let caps = FIELD_KEY_RE.captures(raw)?;
        let id: EntityId = caps.get(3)?.as_str().parse().ok()?;
        let field = caps.get(1)?.as_str();
        let key = match field {
            "doc-text" => Self::DocumentBody(id),
            "doc-notes" => Self::DocumentNotes(id),
            "folder-notes" => Self::FolderNotes(id),
            "project-notes" => Self::ProjectNotes(id),
            _ => Self::draft(DraftKind::parse(caps.get(2)?.as_str())?, id),
        };
        Some(key)
    }

    pub fn delay_class(&self) -> DelayClass {
        match self {
            Self::DraftContent(_) => DelayClass::Short,
            _ => DelayClass::Long,
        }
    }

    pub fn as_draft(&self) -> Option<DraftRef> {
        match self {
            Self::DraftContent(draft) => Some(*draft),
            _ => None,
        }
    }

    pub fn belongs_to_document(&self, document_id: EntityId) -> bool {
        matches!(self, Self::DocumentBody(id) | Self::DocumentNotes(id) if *id == document_id)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Persisted "last selected draft" marker for one scope of one project.
pub fn active_draft_marker(project_id: EntityId, kind: DraftKind) -> String {
    format!("cora-project:{project_id}:active-draft:{}", kind.as_str())
}

pub fn selection_key(project_id: EntityId) -> String {
    format!("cora-project:{project_id}:selection")
}

pub fn tree_state_key(project_id: EntityId) -> String {
    format!("cora-project:{project_id}:tree-state")
}
