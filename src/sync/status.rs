use crate::keys::FieldKey;
use crate::models::SyncStatus;
use crate::signals::{Signal, SignalBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    status: SyncStatus,
    epoch: u64,
}

/// Per-key `pending -> syncing -> synced -> absent` tracking. Every
/// transition is published on the signal bus.
#[derive(Clone)]
pub struct SyncStatusTracker {
    entries: Arc<Mutex<HashMap<FieldKey, StatusEntry>>>,
    epochs: Arc<AtomicU64>,
    signals: SignalBus,
    synced_display: Duration,
}

impl SyncStatusTracker {
    pub fn new(signals: SignalBus, synced_display: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            epochs: Arc::new(AtomicU64::new(0)),
            signals,
            synced_display,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<FieldKey, StatusEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, key: FieldKey, status: Option<SyncStatus>) {
        self.signals.emit(Signal::SyncStatus { key, status });
    }

    /// A new edit always lands here, whatever the previous state. This also
    /// invalidates a running `synced` expiry.
    pub fn mark_pending(&self, key: FieldKey) {
        let epoch = self.next_epoch();
        let previous = self.entries().insert(
            key,
            StatusEntry {
                status: SyncStatus::Pending,
                epoch,
            },
        );
        if previous.map(|entry| entry.status) != Some(SyncStatus::Pending) {
            self.publish(key, Some(SyncStatus::Pending));
        }
    }

    pub fn mark_syncing(&self, key: FieldKey) {
        let epoch = self.next_epoch();
        self.entries().insert(
            key,
            StatusEntry {
                status: SyncStatus::Syncing,
                epoch,
            },
        );
        self.publish(key, Some(SyncStatus::Syncing));
    }

    /// Only a key still in `syncing` becomes `synced`; a key that went back to
    /// `pending` during the write keeps that status. Returns whether the
    /// transition happened.
    pub fn mark_synced(&self, key: FieldKey) -> bool {
        let epoch = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&key) else {
                return false;
            };
            if entry.status != SyncStatus::Syncing {
                return false;
            }
            let epoch = self.next_epoch();
            *entry = StatusEntry {
                status: SyncStatus::Synced,
                epoch,
            };
            epoch
        };
        let expires_at = Instant::now() + self.synced_display;
        self.publish(key, Some(SyncStatus::Synced));

        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            tracker.expire(key, epoch);
        });
        true
    }

    /// A failed write puts the key back to `pending`; nothing is retried here.
    pub fn mark_failed(&self, key: FieldKey) {
        let changed = {
            let mut entries = self.entries();
            match entries.get_mut(&key) {
                Some(entry) if entry.status == SyncStatus::Pending => false,
                _ => {
                    let epoch = self.next_epoch();
                    entries.insert(
                        key,
                        StatusEntry {
                            status: SyncStatus::Pending,
                            epoch,
                        },
                    );
                    true
                }
            }
        };
        if changed {
            self.publish(key, Some(SyncStatus::Pending));
        }
    }

    fn expire(&self, key: FieldKey, epoch: u64) {
        let removed = {
            let mut entries = self.entries();
            match entries.get(&key) {
                Some(entry) if entry.epoch == epoch && entry.status == SyncStatus::Synced => {
                    entries.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.publish(key, None);
        }
    }

    pub fn status(&self, key: &FieldKey) -> Option<SyncStatus> {
        self.entries().get(key).map(|entry| entry.status)
    }

    pub fn forget(&self, key: &FieldKey) {
        if self.entries().remove(key).is_some() {
            self.publish(*key, None);
        }
    }

    pub fn snapshot(&self) -> Vec<(FieldKey, SyncStatus)> {
        let mut statuses: Vec<(FieldKey, SyncStatus)> = self
            .entries()
            .iter()
            .map(|(key, entry)| (*key, entry.status))
            .collect();
        statuses.sort_by_key(|(key, _)| *key);
        statuses
    }
}

impl std::fmt::Debug for SyncStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStatusTracker")
            .field("statuses", &self.snapshot())
            .finish()
    }
}
