use crate::keys::{FieldKey, FIELD_KEY_PREFIX};
use crate::kv::LocalMirror;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct CacheEntry {
    content: String,
    revision: u64,
    cursor: Option<usize>,
}

/// Write-back buffer for every field with an edit the remote store has not
/// confirmed yet. Memory is authoritative; the local mirror is a copy that
/// survives a restart.
pub struct KeyedEditCache {
    entries: Mutex<HashMap<FieldKey, CacheEntry>>,
    mirror: LocalMirror,
    revisions: AtomicU64,
}

impl KeyedEditCache {
    pub fn new(mirror: LocalMirror) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            mirror,
            revisions: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<FieldKey, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the content in memory and in the mirror before returning. The
    /// returned revision identifies this exact content for `clear_if_current`.
    pub fn put(&self, key: FieldKey, content: &str, cursor: Option<usize>) -> u64 {
        let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries().insert(
            key,
            CacheEntry {
                content: content.to_string(),
                revision,
                cursor,
            },
        );
        self.mirror.set(&key.storage_key(), content);
        revision
    }

    pub fn get(&self, key: &FieldKey) -> Option<String> {
        if let Some(entry) = self.entries().get(key) {
            return Some(entry.content.clone());
        }
        self.mirror.get(&key.storage_key())
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn revision(&self, key: &FieldKey) -> Option<u64> {
        self.entries().get(key).map(|entry| entry.revision)
    }

    /// Content and revision taken together, so a flush knows which revision
    /// it is writing.
    pub fn snapshot(&self, key: &FieldKey) -> Option<(String, u64)> {
        self.entries()
            .get(key)
            .map(|entry| (entry.content.clone(), entry.revision))
    }

    pub fn cursor(&self, key: &FieldKey) -> Option<usize> {
        self.entries().get(key).and_then(|entry| entry.cursor)
    }

    pub fn keys(&self) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self.entries().keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self, key: &FieldKey) {
        self.entries().remove(key);
        self.mirror.remove(&key.storage_key());
    }

    /// Clears the key only when nothing newer than `revision` was typed
    /// meanwhile. Returns whether the entry was removed.
    pub fn clear_if_current(&self, key: &FieldKey, revision: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.revision == revision => {
                entries.remove(key);
                drop(entries);
                self.mirror.remove(&key.storage_key());
                true
            }
            _ => false,
        }
    }

    /// Re-adopts field values left in the mirror by a previous session.
    /// Keys already held in memory are left alone.
    pub fn restore(&self) -> Vec<FieldKey> {
        let mut adopted = Vec::new();
        for raw in self.mirror.keys_with_prefix(FIELD_KEY_PREFIX) {
            let Some(key) = FieldKey::parse(&raw) else {
                tracing::warn!(key = %raw, "ignoring unrecognised field key in local store");
                continue;
            };
            if self.contains(&key) {
                continue;
            }
            let Some(content) = self.mirror.get(&raw) else {
                continue;
            };
            let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
            self.entries().insert(
                key,
                CacheEntry {
                    content,
                    revision,
                    cursor: None,
                },
            );
            adopted.push(key);
        }
        adopted.sort();
        adopted
    }
}

impl std::fmt::Debug for KeyedEditCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedEditCache")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::KeyedEditCache;
    use crate::keys::FieldKey;
    use crate::kv::{KeyValueStore, LocalMirror, MemoryKvStore};
    use crate::models::DraftKind;
    use std::sync::Arc;

    fn cache_with_store() -> (KeyedEditCache, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        (KeyedEditCache::new(LocalMirror::new(store.clone())), store)
    }

    #[test]
    fn put_writes_memory_and_mirror_synchronously() {
        let (cache, store) = cache_with_store();
        let key = FieldKey::DocumentBody(3);
        cache.put(key, "It was a dark", Some(13));
        assert_eq!(cache.get(&key).as_deref(), Some("It was a dark"));
        assert_eq!(cache.cursor(&key), Some(13));
        assert_eq!(
            store.get("cora-field:doc-text:3").expect("get").as_deref(),
            Some("It was a dark")
        );
    }

    #[test]
    fn get_falls_back_to_the_mirror() {
        let (cache, store) = cache_with_store();
        store.set("cora-field:doc-notes:5", "left over").expect("seed");
        assert_eq!(cache.get(&FieldKey::DocumentNotes(5)).as_deref(), Some("left over"));
        assert_eq!(cache.get(&FieldKey::DocumentNotes(6)), None);
    }

    #[test]
    fn stale_revision_does_not_clear_newer_content() {
        let (cache, store) = cache_with_store();
        let key = FieldKey::draft(DraftKind::Folder, 2);
        let first = cache.put(key, "a", None);
        let second = cache.put(key, "ab", None);
        assert!(!cache.clear_if_current(&key, first));
        assert_eq!(cache.get(&key).as_deref(), Some("ab"));
        assert!(cache.clear_if_current(&key, second));
        assert_eq!(cache.get(&key), None);
        assert!(store.get("cora-field:draft:folder:2").expect("get").is_none());
    }

    #[test]
    fn mirror_failure_keeps_memory_authoritative() {
        let (cache, store) = cache_with_store();
        store.set_fail_writes(true);
        let key = FieldKey::ProjectNotes(1);
        cache.put(key, "outline", None);
        assert_eq!(cache.get(&key).as_deref(), Some("outline"));
    }

    #[test]
    fn restore_adopts_only_field_keys() {
        let (cache, store) = cache_with_store();
        store.set("cora-field:doc-text:9", "recovered").expect("seed");
        store.set("cora-field:bogus:1", "junk").expect("seed");
        store.set("cora-project:1:active-draft:doc", "4").expect("seed");
        let adopted = cache.restore();
        assert_eq!(adopted, vec![FieldKey::DocumentBody(9)]);
        assert!(cache.contains(&FieldKey::DocumentBody(9)));
    }
}
