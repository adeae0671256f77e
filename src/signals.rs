use crate::drafts::ActiveDrafts;
use crate::hierarchy::selection::Selection;
use crate::hierarchy::Forest;
use crate::keys::FieldKey;
use crate::models::SyncStatus;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outgoing state changes for whatever renders the workspace.
#[derive(Debug, Clone)]
pub enum Signal {
    /// `None` means the key has no visible status any more.
    SyncStatus {
        key: FieldKey,
        status: Option<SyncStatus>,
    },
    Selection(Selection),
    Hierarchy(Arc<Forest>),
    ActiveDraft(ActiveDrafts),
    /// Blocking user-facing message, e.g. a failed structural mutation.
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub signal: Signal,
}

#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<SignalEnvelope>,
    seq: Arc<AtomicU64>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEnvelope> {
        self.sender.subscribe()
    }

    /// Emitting with no subscribers is not an error.
    pub fn emit(&self, signal: Signal) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.sender.send(SignalEnvelope {
            seq,
            timestamp: Utc::now(),
            signal,
        });
    }

    pub fn notice(&self, message: impl Into<String>) {
        self.emit(Signal::Notice(message.into()));
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Signal, SignalBus};

    #[tokio::test]
    async fn envelopes_carry_increasing_sequence_numbers() {
        let bus = SignalBus::new(8);
        let mut receiver = bus.subscribe();
        bus.notice("first");
        bus.notice("second");

        let first = receiver.recv().await.expect("first");
        let second = receiver.recv().await.expect("second");
        assert!(second.seq > first.seq);
        assert!(matches!(first.signal, Signal::Notice(ref text) if text == "first"));
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let bus = SignalBus::new(1);
        bus.notice("nobody listening");
    }
}
