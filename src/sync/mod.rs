pub mod cache;
pub mod debounce;
pub mod engine;
pub mod status;

pub use cache::KeyedEditCache;
pub use debounce::DebounceFlusher;
pub use engine::EditSync;
pub use status::SyncStatusTracker;
