use crate::keys::active_draft_marker;
use crate::kv::LocalMirror;
use crate::models::{DraftKind, DraftRef, EntityId};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// The active draft per scope. At most one slot is ever set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDrafts {
    pub document: Option<EntityId>,
    pub folder: Option<EntityId>,
    pub project: Option<EntityId>,
}

impl ActiveDrafts {
    pub fn get(&self, kind: DraftKind) -> Option<EntityId> {
        match kind {
            DraftKind::Document => self.document,
            DraftKind::Folder => self.folder,
            DraftKind::Project => self.project,
        }
    }

    fn slot_mut(&mut self, kind: DraftKind) -> &mut Option<EntityId> {
        match kind {
            DraftKind::Document => &mut self.document,
            DraftKind::Folder => &mut self.folder,
            DraftKind::Project => &mut self.project,
        }
    }

    pub fn current(&self) -> Option<DraftRef> {
        DraftKind::ALL
            .into_iter()
            .find_map(|kind| self.get(kind).map(|id| DraftRef::new(kind, id)))
    }
}

/// Result of clicking a draft in one of the shelves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftClick {
    Activated(DraftRef),
    /// The draft was already active; it is deactivated by `settle` unless a
    /// second click arrives within the grace period.
    AwaitingSecondClick(DraftRef),
    Rename(DraftRef),
}

#[derive(Debug)]
pub struct ScopeExclusivityController {
    project_id: EntityId,
    active: ActiveDrafts,
    pending_click: Option<(DraftRef, Instant)>,
    grace: Duration,
    mirror: LocalMirror,
}

impl ScopeExclusivityController {
    pub fn new(project_id: EntityId, mirror: LocalMirror, grace: Duration) -> Self {
        Self {
            project_id,
            active: ActiveDrafts::default(),
            pending_click: None,
            grace,
            mirror,
        }
    }

    /// Restores the last active draft from the persisted markers. Should more
    /// than one marker survive, document beats folder beats project and the
    /// losers are removed.
    pub fn restore(&mut self) -> ActiveDrafts {
        let mut restored = None;
        for kind in DraftKind::ALL {
            let marker = active_draft_marker(self.project_id, kind);
            let Some(raw) = self.mirror.get(&marker) else {
                continue;
            };
            match raw.trim().parse::<EntityId>() {
                Ok(id) if restored.is_none() => restored = Some(DraftRef::new(kind, id)),
                Ok(_) => self.mirror.remove(&marker),
                Err(_) => {
                    tracing::warn!(marker = %marker, "discarding unreadable draft marker");
                    self.mirror.remove(&marker);
                }
            }
        }
        self.active = ActiveDrafts::default();
        if let Some(draft) = restored {
            *self.active.slot_mut(draft.kind) = Some(draft.id);
        }
        self.active
    }

    pub fn activate(&mut self, draft: DraftRef) -> ActiveDrafts {
        for kind in DraftKind::ALL {
            if kind == draft.kind {
                continue;
            }
            *self.active.slot_mut(kind) = None;
            self.mirror.remove(&active_draft_marker(self.project_id, kind));
        }
        *self.active.slot_mut(draft.kind) = Some(draft.id);
        self.mirror
            .set(&active_draft_marker(self.project_id, draft.kind), &draft.id.to_string());
        self.pending_click = None;
        self.active
    }

    pub fn deactivate(&mut self, kind: DraftKind) -> ActiveDrafts {
        *self.active.slot_mut(kind) = None;
        self.mirror.remove(&active_draft_marker(self.project_id, kind));
        if matches!(self.pending_click, Some((draft, _)) if draft.kind == kind) {
            self.pending_click = None;
        }
        self.active
    }

    pub fn click(&mut self, draft: DraftRef, now: Instant) -> DraftClick {
        if !self.is_active(draft) {
            self.activate(draft);
            return DraftClick::Activated(draft);
        }
        match self.pending_click {
            Some((pending, at)) if pending == draft && now.duration_since(at) < self.grace => {
                self.pending_click = None;
                DraftClick::Rename(draft)
            }
            _ => {
                self.pending_click = Some((draft, now));
                DraftClick::AwaitingSecondClick(draft)
            }
        }
    }

    /// Completes a single click on an active draft once the grace period has
    /// passed. Returns the draft that was deactivated, if any.
    pub fn settle(&mut self, now: Instant) -> Option<DraftRef> {
        let (draft, at) = self.pending_click?;
        if now.duration_since(at) < self.grace {
            return None;
        }
        self.pending_click = None;
        if self.is_active(draft) {
            self.deactivate(draft.kind);
            return Some(draft);
        }
        None
    }

    /// Called after a draft was deleted.
    pub fn forget(&mut self, draft: DraftRef) -> ActiveDrafts {
        if self.is_active(draft) {
            self.deactivate(draft.kind);
        }
        if matches!(self.pending_click, Some((pending, _)) if pending == draft) {
            self.pending_click = None;
        }
        self.active
    }

    pub fn active(&self) -> ActiveDrafts {
        self.active
    }

    pub fn is_active(&self, draft: DraftRef) -> bool {
        self.active.get(draft.kind) == Some(draft.id)
    }
}
