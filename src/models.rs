use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type EntityId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    pub timeline_start: Option<NaiveDate>,
    pub timeline_end: Option<NaiveDate>,
}

/// A folder as returned by the remote store. Expansion is session state and
/// lives on the rebuilt tree node, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: EntityId,
    pub project_id: EntityId,
    pub parent_id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: EntityId,
    pub project_id: EntityId,
    pub folder_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub notes: String,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DraftKind {
    Document,
    Folder,
    Project,
}

impl DraftKind {
    pub const ALL: [DraftKind; 3] = [Self::Document, Self::Folder, Self::Project];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "doc",
            Self::Folder => "folder",
            Self::Project => "project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "doc" => Some(Self::Document),
            "folder" => Some(Self::Folder),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

/// Draft ids are only unique within one kind, so a draft is always addressed
/// by the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRef {
    pub kind: DraftKind,
    pub id: EntityId,
}

impl DraftRef {
    pub fn new(kind: DraftKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: EntityId,
    pub kind: DraftKind,
    pub owner_id: EntityId,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn draft_ref(&self) -> DraftRef {
        DraftRef::new(self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Document,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderCreate {
    pub project_id: EntityId,
    pub name: String,
    pub parent_id: Option<EntityId>,
    /// Place the new folder directly after the sibling with this sort order.
    pub after_sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCreate {
    pub project_id: EntityId,
    pub folder_id: EntityId,
    pub name: String,
    pub after_sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCreate {
    pub kind: DraftKind,
    pub owner_id: EntityId,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftUpdate {
    pub name: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
        }
    }
}
