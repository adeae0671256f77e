pub mod selection;

use crate::errors::AppResult;
use crate::keys::tree_state_key;
use crate::kv::LocalMirror;
use crate::models::{Document, EntityId, Folder, NodeKind};
use crate::remote::RemoteStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Folder ids the user has expanded. Session state that outlives rebuilds and
/// is persisted per project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedFolders {
    #[serde(rename = "expandedFolderIds")]
    ids: BTreeSet<EntityId>,
}

impl ExpandedFolders {
    pub fn contains(&self, folder_id: EntityId) -> bool {
        self.ids.contains(&folder_id)
    }

    pub fn insert(&mut self, folder_id: EntityId) -> bool {
        self.ids.insert(folder_id)
    }

    pub fn remove(&mut self, folder_id: EntityId) -> bool {
        self.ids.remove(&folder_id)
    }

    pub fn retain(&mut self, keep: impl Fn(EntityId) -> bool) {
        self.ids.retain(|id| keep(*id));
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ids.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub folder: Folder,
    pub expanded: bool,
    children: Vec<usize>,
    documents: Vec<usize>,
}

impl FolderNode {
    pub fn id(&self) -> EntityId {
        self.folder.id
    }
}

/// One row of the flattened, expansion-aware view of the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItem {
    pub kind: NodeKind,
    pub id: EntityId,
    pub depth: usize,
}

/// Folder/document forest built from flat lists. Nodes live in arenas and are
/// linked by index; lookups by id go through the indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    folders: Vec<FolderNode>,
    documents: Vec<Document>,
    roots: Vec<usize>,
    folder_index: HashMap<EntityId, usize>,
    document_index: HashMap<EntityId, usize>,
}

fn by_sort_order<T>(items: &mut [T], order_of: impl Fn(&T) -> Option<i64>) {
    items.sort_by_key(|item| match order_of(item) {
        Some(order) => (0, order),
        None => (1, 0),
    });
}

impl Forest {
    pub fn build(folders: Vec<Folder>, documents: Vec<Document>, expanded: &ExpandedFolders) -> Self {
        let mut folders = folders;
        by_sort_order(&mut folders, |folder| folder.sort_order);

        let mut seen = HashSet::new();
        folders.retain(|folder| {
            let fresh = seen.insert(folder.id);
            if !fresh {
                tracing::warn!(folder_id = folder.id, "duplicate folder in listing");
            }
            fresh
        });

        // Reachability from the roots drops orphans and cycles in one pass.
        let mut children_of: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        let mut root_ids = Vec::new();
        for folder in &folders {
            match folder.parent_id {
                None => root_ids.push(folder.id),
                Some(parent) => children_of.entry(parent).or_default().push(folder.id),
            }
        }
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<EntityId> = root_ids.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if reachable.insert(id) {
                if let Some(children) = children_of.get(&id) {
                    queue.extend(children.iter().copied());
                }
            }
        }

        let mut forest = Self::default();
        for folder in folders {
            if !reachable.contains(&folder.id) {
                tracing::warn!(
                    folder_id = folder.id,
                    parent_id = ?folder.parent_id,
                    "dropping folder without a reachable parent"
                );
                continue;
            }
            forest.folder_index.insert(folder.id, forest.folders.len());
            forest.folders.push(FolderNode {
                expanded: expanded.contains(folder.id),
                folder,
                children: Vec::new(),
                documents: Vec::new(),
            });
        }

        for index in 0..forest.folders.len() {
            match forest.folders[index].folder.parent_id {
                None => forest.roots.push(index),
                Some(parent) => {
                    if let Some(&parent_index) = forest.folder_index.get(&parent) {
                        forest.folders[parent_index].children.push(index);
                    }
                }
            }
        }

        let mut documents = documents;
        by_sort_order(&mut documents, |document| document.sort_order);
        for document in documents {
            let Some(&folder_index) = forest.folder_index.get(&document.folder_id) else {
                tracing::warn!(
                    document_id = document.id,
                    folder_id = document.folder_id,
                    "dropping document without a folder"
                );
                continue;
            };
            if forest.document_index.contains_key(&document.id) {
                continue;
            }
            let index = forest.documents.len();
            forest.document_index.insert(document.id, index);
            forest.folders[folder_index].documents.push(index);
            forest.documents.push(document);
        }

        forest
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn roots(&self) -> Vec<&FolderNode> {
        self.roots.iter().map(|&index| &self.folders[index]).collect()
    }

    pub fn folder(&self, folder_id: EntityId) -> Option<&FolderNode> {
        self.folder_index
            .get(&folder_id)
            .map(|&index| &self.folders[index])
    }

    pub fn document(&self, document_id: EntityId) -> Option<&Document> {
        self.document_index
            .get(&document_id)
            .map(|&index| &self.documents[index])
    }

    pub fn child_folders(&self, folder_id: EntityId) -> Vec<&FolderNode> {
        self.folder(folder_id)
            .map(|node| node.children.iter().map(|&index| &self.folders[index]).collect())
            .unwrap_or_default()
    }

    pub fn folder_documents(&self, folder_id: EntityId) -> Vec<&Document> {
        self.folder(folder_id)
            .map(|node| {
                node.documents
                    .iter()
                    .map(|&index| &self.documents[index])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document_folder(&self, document_id: EntityId) -> Option<EntityId> {
        self.document(document_id).map(|document| document.folder_id)
    }

    pub fn folder_parent(&self, folder_id: EntityId) -> Option<EntityId> {
        self.folder(folder_id).and_then(|node| node.folder.parent_id)
    }

    /// Ids of the folders sharing the folder's parent, itself included, in
    /// display order.
    pub fn folder_siblings(&self, folder_id: EntityId) -> Vec<EntityId> {
        match self.folder(folder_id) {
            None => Vec::new(),
            Some(node) => match node.folder.parent_id {
                None => self.roots().into_iter().map(FolderNode::id).collect(),
                Some(parent) => self
                    .child_folders(parent)
                    .into_iter()
                    .map(FolderNode::id)
                    .collect(),
            },
        }
    }

    pub fn document_siblings(&self, document_id: EntityId) -> Vec<EntityId> {
        self.document_folder(document_id)
            .map(|folder_id| {
                self.folder_documents(folder_id)
                    .into_iter()
                    .map(|document| document.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The folder and every folder below it.
    pub fn folder_ids_within(&self, folder_id: EntityId) -> Vec<EntityId> {
        let mut collected = Vec::new();
        let Some(&start) = self.folder_index.get(&folder_id) else {
            return collected;
        };
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            let node = &self.folders[index];
            collected.push(node.id());
            stack.extend(node.children.iter().rev().copied());
        }
        collected
    }

    pub fn document_ids_within(&self, folder_id: EntityId) -> Vec<EntityId> {
        self.folder_ids_within(folder_id)
            .into_iter()
            .flat_map(|id| self.folder_documents(id))
            .map(|document| document.id)
            .collect()
    }

    /// Every document in tree order, ignoring expansion.
    pub fn documents(&self) -> Vec<&Document> {
        let mut ordered = Vec::with_capacity(self.documents.len());
        for &root in &self.roots {
            self.collect_documents(root, &mut ordered);
        }
        ordered
    }

    fn collect_documents<'a>(&'a self, index: usize, out: &mut Vec<&'a Document>) {
        let node = &self.folders[index];
        for &child in &node.children {
            self.collect_documents(child, out);
        }
        out.extend(node.documents.iter().map(|&doc| &self.documents[doc]));
    }

    pub fn first_document(&self) -> Option<&Document> {
        self.documents().into_iter().next()
    }

    pub fn first_folder(&self) -> Option<&FolderNode> {
        self.roots.first().map(|&index| &self.folders[index])
    }

    /// Rows as displayed: a folder, then (when expanded) its child folders
    /// and its documents.
    pub fn visible_items(&self) -> Vec<TreeItem> {
        let mut items = Vec::new();
        for &root in &self.roots {
            self.collect_visible(root, 0, &mut items);
        }
        items
    }

    fn collect_visible(&self, index: usize, depth: usize, out: &mut Vec<TreeItem>) {
        let node = &self.folders[index];
        out.push(TreeItem {
            kind: NodeKind::Folder,
            id: node.id(),
            depth,
        });
        if !node.expanded {
            return;
        }
        for &child in &node.children {
            self.collect_visible(child, depth + 1, out);
        }
        out.extend(node.documents.iter().map(|&doc| TreeItem {
            kind: NodeKind::Document,
            id: self.documents[doc].id,
            depth: depth + 1,
        }));
    }

    pub fn set_expanded(&mut self, folder_id: EntityId, expanded: bool) -> bool {
        match self.folder_index.get(&folder_id) {
            Some(&index) => {
                self.folders[index].expanded = expanded;
                true
            }
            None => false,
        }
    }

    pub fn contains_folder(&self, folder_id: EntityId) -> bool {
        self.folder_index.contains_key(&folder_id)
    }

    pub fn contains_document(&self, document_id: EntityId) -> bool {
        self.document_index.contains_key(&document_id)
    }
}

/// Owns the current forest for one project and rebuilds it from the remote
/// listings after every structural change.
#[derive(Debug)]
pub struct HierarchyRebuilder {
    project_id: EntityId,
    expanded: ExpandedFolders,
    forest: Arc<Forest>,
    mirror: LocalMirror,
}

impl HierarchyRebuilder {
    pub fn new(project_id: EntityId, mirror: LocalMirror) -> Self {
        let expanded = mirror
            .load_json::<ExpandedFolders>(&tree_state_key(project_id))
            .unwrap_or_default();
        Self {
            project_id,
            expanded,
            forest: Arc::new(Forest::default()),
            mirror,
        }
    }

    pub async fn load(&mut self, remote: &dyn RemoteStore) -> AppResult<Arc<Forest>> {
        let folders = remote.list_folders(self.project_id).await?;
        let documents = remote.list_documents(self.project_id).await?;
        Ok(self.rebuild(folders, documents))
    }

    pub fn rebuild(&mut self, folders: Vec<Folder>, documents: Vec<Document>) -> Arc<Forest> {
        let forest = Forest::build(folders, documents, &self.expanded);
        let before = self.expanded.clone();
        self.expanded.retain(|id| forest.contains_folder(id));
        if self.expanded != before {
            self.persist();
        }
        tracing::debug!(
            project_id = self.project_id,
            folders = forest.folders.len(),
            documents = forest.documents.len(),
            "hierarchy rebuilt"
        );
        self.forest = Arc::new(forest);
        self.forest.clone()
    }

    pub fn forest(&self) -> Arc<Forest> {
        self.forest.clone()
    }

    pub fn expanded(&self) -> &ExpandedFolders {
        &self.expanded
    }

    /// Returns the folder's new expansion state.
    pub fn toggle(&mut self, folder_id: EntityId) -> bool {
        if self.expanded.contains(folder_id) {
            self.collapse(folder_id);
            false
        } else {
            self.expand(folder_id);
            true
        }
    }

    pub fn expand(&mut self, folder_id: EntityId) {
        self.set_expanded(folder_id, true);
    }

    pub fn collapse(&mut self, folder_id: EntityId) {
        self.set_expanded(folder_id, false);
    }

    fn set_expanded(&mut self, folder_id: EntityId, expanded: bool) {
        let changed = if expanded {
            self.expanded.insert(folder_id)
        } else {
            self.expanded.remove(folder_id)
        };
        Arc::make_mut(&mut self.forest).set_expanded(folder_id, expanded);
        if changed {
            self.persist();
        }
    }

    fn persist(&self) {
        self.mirror
            .save_json(&tree_state_key(self.project_id), &self.expanded);
    }
}
