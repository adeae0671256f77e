use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Process-wide local key-value store. Writes are last-write-wins per key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set`/`remove` fail, simulating a full or
    /// unavailable local store.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Io("local store rejected write".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AppError::Internal("kv lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Internal("kv lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AppError::Internal("kv lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AppError::Internal("kv lock poisoned".to_string()))?;
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Best-effort view over the local store. Failures are logged and swallowed:
/// the in-memory state stays authoritative for the session.
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn KeyValueStore>,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key, error = %error, "local store read failed");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(error) = self.store.set(key, value) {
            tracing::warn!(key, error = %error, "local store write failed");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(error) = self.store.remove(key) {
            tracing::warn!(key, error = %error, "local store remove failed");
        }
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.store.keys_with_prefix(prefix).unwrap_or_else(|error| {
            tracing::warn!(prefix, error = %error, "local store scan failed");
            Vec::new()
        })
    }

    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, error = %error, "discarding unreadable local state");
                None
            }
        }
    }

    pub fn save_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.set(key, &json),
            Err(error) => tracing::warn!(key, error = %error, "failed to encode local state"),
        }
    }
}

impl std::fmt::Debug for LocalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMirror").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyValueStore, LocalMirror, MemoryKvStore};
    use std::sync::Arc;

    #[test]
    fn prefix_scan_only_returns_matching_keys() {
        let store = MemoryKvStore::new();
        store.set("cora-field:doc-text:1", "a").expect("set");
        store.set("cora-field:doc-notes:1", "b").expect("set");
        store.set("cora-project:1:selection", "{}").expect("set");
        let keys = store.keys_with_prefix("cora-field:").expect("scan");
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn mirror_swallows_write_failures() {
        let store = Arc::new(MemoryKvStore::new());
        let mirror = LocalMirror::new(store.clone());
        mirror.set("k", "v1");
        store.set_fail_writes(true);
        mirror.set("k", "v2");
        mirror.remove("k");
        assert_eq!(mirror.get("k").as_deref(), Some("v1"));
    }

    #[test]
    fn unreadable_json_is_treated_as_absent() {
        let store = Arc::new(MemoryKvStore::new());
        let mirror = LocalMirror::new(store);
        mirror.set("tree", "not json");
        let loaded: Option<Vec<i64>> = mirror.load_json("tree");
        assert!(loaded.is_none());
        mirror.save_json("tree", &vec![1_i64, 2]);
        assert_eq!(mirror.load_json::<Vec<i64>>("tree"), Some(vec![1, 2]));
    }

    #[test]
    fn mirror_debug_output_hides_the_store() {
        let mirror = LocalMirror::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(format!("{mirror:?}"), "LocalMirror { .. }");
    }
}
