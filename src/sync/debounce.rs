use crate::keys::FieldKey;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

pub type FlushFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type FlushExecutor = Arc<dyn Fn(FieldKey) -> FlushFuture + Send + Sync>;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// At most one pending flush per key. Rescheduling a key replaces its timer;
/// other keys are never touched.
#[derive(Clone)]
pub struct DebounceFlusher {
    timers: Arc<Mutex<HashMap<FieldKey, PendingTimer>>>,
    executor: Arc<RwLock<Option<FlushExecutor>>>,
    generations: Arc<AtomicU64>,
}

impl Default for DebounceFlusher {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceFlusher {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            executor: Arc::new(RwLock::new(None)),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_executor(&self, executor: FlushExecutor) {
        let mut writer = self
            .executor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *writer = Some(executor);
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<FieldKey, PendingTimer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts (or restarts) the key's timer. The window is measured from this
    /// call, not from when the timer task first runs. When it fires the timer entry is
    /// removed before the flush begins, so a later `cancel` can never abort a
    /// write that is already on its way.
    pub fn schedule(&self, key: FieldKey, delay: Duration) {
        let deadline = Instant::now() + delay;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let flusher = self.clone();
        let mut timers = self.timers();
        if let Some(previous) = timers.remove(&key) {
            previous.handle.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut timers = flusher.timers();
                match timers.get(&key) {
                    Some(pending) if pending.generation == generation => {
                        timers.remove(&key);
                    }
                    _ => return,
                }
            }
            tracing::debug!(key = %key, "debounce window elapsed");
            flusher.execute(key).await;
        });
        timers.insert(key, PendingTimer { generation, handle });
    }

    /// Cancels the key's timer and runs its flush right away.
    pub async fn flush_now(&self, key: FieldKey) {
        self.cancel(&key);
        self.execute(key).await;
    }

    pub fn cancel(&self, key: &FieldKey) -> bool {
        match self.timers().remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, pending) in self.timers().drain() {
            pending.handle.abort();
        }
    }

    pub fn is_scheduled(&self, key: &FieldKey) -> bool {
        self.timers().contains_key(key)
    }

    pub fn pending_keys(&self) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self.timers().keys().copied().collect();
        keys.sort();
        keys
    }

    async fn execute(&self, key: FieldKey) {
        let executor = self
            .executor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match executor {
            Some(executor) => executor(key).await,
            None => tracing::warn!(key = %key, "flush requested before an executor was set"),
        }
    }
}

impl std::fmt::Debug for DebounceFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceFlusher")
            .field("pending", &self.pending_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DebounceFlusher, FlushExecutor};
    use crate::keys::FieldKey;
    use std::sync::{Arc, Mutex};
    use tokio::time::{advance, Duration, Instant};

    fn recording_flusher() -> (DebounceFlusher, Arc<Mutex<Vec<(FieldKey, Instant)>>>) {
        let flusher = DebounceFlusher::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let executor: FlushExecutor = Arc::new(move |key| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().expect("sink").push((key, Instant::now()));
            })
        });
        flusher.set_executor(executor);
        (flusher, fired)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_resets_the_window() {
        let (flusher, fired) = recording_flusher();
        let key = FieldKey::DocumentBody(1);
        let start = Instant::now();

        flusher.schedule(key, Duration::from_millis(2_000));
        advance(Duration::from_millis(1_500)).await;
        flusher.schedule(key, Duration::from_millis(2_000));
        advance(Duration::from_millis(1_500)).await;
        settle().await;
        assert!(fired.lock().expect("fired").is_empty());

        advance(Duration::from_millis(600)).await;
        settle().await;
        let fired = fired.lock().expect("fired");
        assert_eq!(fired.len(), 1);
        assert!(fired[0].1 - start >= Duration::from_millis(3_500));
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_measured_from_the_schedule_call() {
        let (flusher, fired) = recording_flusher();
        let key = FieldKey::draft(crate::models::DraftKind::Document, 3);
        let start = Instant::now();

        flusher.schedule(key, Duration::from_millis(500));
        advance(Duration::from_millis(500)).await;
        settle().await;
        let fired = fired.lock().expect("fired");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1 - start, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (flusher, fired) = recording_flusher();
        flusher.schedule(FieldKey::DocumentNotes(1), Duration::from_millis(2_000));
        flusher.schedule(FieldKey::FolderNotes(1), Duration::from_millis(500));
        advance(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(fired.lock().expect("fired").len(), 1);
        assert!(flusher.is_scheduled(&FieldKey::DocumentNotes(1)));
        assert!(!flusher.is_scheduled(&FieldKey::FolderNotes(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_cancels_the_timer() {
        let (flusher, fired) = recording_flusher();
        let key = FieldKey::ProjectNotes(4);
        flusher.schedule(key, Duration::from_millis(2_000));
        flusher.flush_now(key).await;
        assert_eq!(fired.lock().expect("fired").len(), 1);

        advance(Duration::from_millis(5_000)).await;
        settle().await;
        assert_eq!(fired.lock().expect("fired").len(), 1);
        assert!(flusher.pending_keys().is_empty());
    }
}
