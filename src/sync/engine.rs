use super::cache::KeyedEditCache;
use super::debounce::{DebounceFlusher, FlushExecutor};
use super::status::SyncStatusTracker;
use crate::config::SyncConfig;
use crate::errors::AppResult;
use crate::keys::FieldKey;
use crate::kv::LocalMirror;
use crate::models::{Draft, DraftRef, DraftUpdate, SyncStatus};
use crate::remote::RemoteStore;
use crate::signals::SignalBus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EditSyncInner {
    config: SyncConfig,
    cache: KeyedEditCache,
    flusher: DebounceFlusher,
    status: SyncStatusTracker,
    remote: Arc<dyn RemoteStore>,
    /// Last value known to be stored remotely, per key.
    remote_values: Mutex<HashMap<FieldKey, String>>,
    /// Keys with a write on the wire. The flag records that another flush was
    /// requested while it was running.
    in_flight: Mutex<HashMap<FieldKey, bool>>,
    draft_meta: Mutex<HashMap<DraftRef, Draft>>,
}

/// Edit pipeline for every text field: cache on each keystroke, debounce,
/// write to the remote store, track the outcome.
#[derive(Clone)]
pub struct EditSync {
    inner: Arc<EditSyncInner>,
}

impl EditSync {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        mirror: LocalMirror,
        signals: SignalBus,
        config: SyncConfig,
    ) -> Self {
        let inner = Arc::new(EditSyncInner {
            cache: KeyedEditCache::new(mirror),
            flusher: DebounceFlusher::new(),
            status: SyncStatusTracker::new(signals, config.synced_display()),
            remote,
            remote_values: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            draft_meta: Mutex::new(HashMap::new()),
            config,
        });

        let weak: Weak<EditSyncInner> = Arc::downgrade(&inner);
        let executor: FlushExecutor = Arc::new(move |key| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    EditSync { inner }.flush(key).await;
                }
            })
        });
        inner.flusher.set_executor(executor);

        Self { inner }
    }

    /// Records a keystroke. Memory and the local mirror are updated before
    /// this returns; the remote write is debounced.
    pub fn edit(&self, key: FieldKey, content: &str, cursor: Option<usize>) {
        self.inner.cache.put(key, content, cursor);
        self.inner.status.mark_pending(key);
        let window = key.delay_class().window(&self.inner.config);
        self.inner.flusher.schedule(key, window);
    }

    /// Skips the debounce window and writes the key's pending content now.
    pub async fn commit_now(&self, key: FieldKey) {
        if self.inner.cache.contains(&key) {
            self.inner.flusher.flush_now(key).await;
        } else {
            self.inner.flusher.cancel(&key);
        }
    }

    /// Flushes every pending key, e.g. before the process is suspended.
    pub async fn commit_all(&self) {
        for key in self.inner.cache.keys() {
            self.commit_now(key).await;
        }
    }

    /// Records the value the remote store returned on a deliberate reload. A
    /// pending local edit keeps precedence in `value`.
    pub fn hydrate(&self, key: FieldKey, remote_value: &str) {
        lock(&self.inner.remote_values).insert(key, remote_value.to_string());
    }

    /// Like `hydrate`, but keeps a remote value already known for the key.
    pub fn hydrate_missing(&self, key: FieldKey, remote_value: &str) {
        lock(&self.inner.remote_values)
            .entry(key)
            .or_insert_with(|| remote_value.to_string());
    }

    pub fn value(&self, key: &FieldKey) -> Option<String> {
        self.inner
            .cache
            .get(key)
            .or_else(|| lock(&self.inner.remote_values).get(key).cloned())
    }

    pub fn has_pending_edit(&self, key: &FieldKey) -> bool {
        self.inner.cache.contains(key)
    }

    pub fn pending_keys(&self) -> Vec<FieldKey> {
        self.inner.cache.keys()
    }

    pub fn status(&self, key: &FieldKey) -> Option<SyncStatus> {
        self.inner.status.status(key)
    }

    pub fn statuses(&self) -> Vec<(FieldKey, SyncStatus)> {
        self.inner.status.snapshot()
    }

    pub fn cursor(&self, key: &FieldKey) -> Option<usize> {
        self.inner.cache.cursor(key)
    }

    pub fn is_in_flight(&self, key: &FieldKey) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }

    pub fn is_scheduled(&self, key: &FieldKey) -> bool {
        self.inner.flusher.is_scheduled(key)
    }

    /// Drops everything held for a field whose entity no longer exists.
    pub fn forget(&self, key: &FieldKey) {
        self.inner.flusher.cancel(key);
        self.inner.cache.clear(key);
        self.inner.status.forget(key);
        lock(&self.inner.remote_values).remove(key);
        if let Some(draft) = key.as_draft() {
            lock(&self.inner.draft_meta).remove(&draft);
        }
    }

    pub fn forget_matching(&self, predicate: impl Fn(&FieldKey) -> bool) {
        let mut keys: Vec<FieldKey> = self.inner.cache.keys();
        keys.extend(lock(&self.inner.remote_values).keys().copied());
        keys.sort();
        keys.dedup();
        for key in keys.into_iter().filter(|key| predicate(key)) {
            self.forget(&key);
        }
    }

    /// Re-adopts unsynced edits from the local mirror and schedules them as
    /// if they had just been typed.
    pub fn recover(&self) -> Vec<FieldKey> {
        let adopted = self.inner.cache.restore();
        for key in &adopted {
            self.inner.status.mark_pending(*key);
            let window = key.delay_class().window(&self.inner.config);
            self.inner.flusher.schedule(*key, window);
        }
        if !adopted.is_empty() {
            tracing::info!(count = adopted.len(), "recovered unsynced edits from local store");
        }
        adopted
    }

    pub fn draft_metadata(&self, draft: &DraftRef) -> Option<Draft> {
        lock(&self.inner.draft_meta).get(draft).cloned()
    }

    pub fn remember_draft(&self, draft: Draft) {
        let key = FieldKey::DraftContent(draft.draft_ref());
        lock(&self.inner.remote_values).insert(key, draft.content.clone());
        lock(&self.inner.draft_meta).insert(draft.draft_ref(), draft);
    }

    async fn flush(&self, key: FieldKey) {
        {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(follow_up) = in_flight.get_mut(&key) {
                *follow_up = true;
                tracing::debug!(key = %key, "write in flight, coalescing flush");
                return;
            }
            in_flight.insert(key, false);
        }

        loop {
            if let Some((content, revision)) = self.inner.cache.snapshot(&key) {
                self.write_once(key, content, revision).await;
            }

            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get_mut(&key) {
                Some(follow_up) if *follow_up => *follow_up = false,
                _ => {
                    in_flight.remove(&key);
                    break;
                }
            }
        }
    }

    async fn write_once(&self, key: FieldKey, content: String, revision: u64) {
        self.inner.status.mark_syncing(key);
        match self.write_remote(key, &content).await {
            Ok(draft) => {
                if let Some(draft) = draft {
                    lock(&self.inner.draft_meta).insert(draft.draft_ref(), draft);
                }
                lock(&self.inner.remote_values).insert(key, content);
                if self.inner.cache.clear_if_current(&key, revision) {
                    self.inner.status.mark_synced(key);
                } else {
                    tracing::debug!(key = %key, "newer edit arrived during write");
                }
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "remote write failed, edit kept pending");
                self.inner.status.mark_failed(key);
            }
        }
    }

    async fn write_remote(&self, key: FieldKey, content: &str) -> AppResult<Option<Draft>> {
        let remote = &self.inner.remote;
        match key {
            FieldKey::DocumentBody(id) => remote.update_document_text(id, content).await.map(|_| None),
            FieldKey::DocumentNotes(id) => {
                remote.update_document_notes(id, content).await.map(|_| None)
            }
            FieldKey::FolderNotes(id) => remote.update_folder_notes(id, content).await.map(|_| None),
            FieldKey::ProjectNotes(id) => {
                remote.update_project_notes(id, content).await.map(|_| None)
            }
            FieldKey::DraftContent(draft) => {
                let update = DraftUpdate {
                    name: None,
                    content: Some(content.to_string()),
                };
                remote.update_draft(draft, update).await.map(Some)
            }
        }
    }
}

impl std::fmt::Debug for EditSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSync")
            .field("pending", &self.inner.cache.keys())
            .finish()
    }
}
