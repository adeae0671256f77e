pub mod config;
pub mod db;
pub mod drafts;
pub mod errors;
pub mod hierarchy;
pub mod keys;
pub mod kv;
pub mod models;
pub mod remote;
pub mod signals;
pub mod sync;
pub mod workspace;

pub use crate::config::SyncConfig;
pub use crate::db::Database;
pub use crate::drafts::{ActiveDrafts, DraftClick, ScopeExclusivityController};
pub use crate::errors::{AppError, AppResult};
pub use crate::hierarchy::selection::Selection;
pub use crate::hierarchy::{Forest, HierarchyRebuilder};
pub use crate::keys::FieldKey;
pub use crate::kv::{KeyValueStore, LocalMirror, MemoryKvStore};
pub use crate::remote::memory::MemoryRemoteStore;
pub use crate::remote::RemoteStore;
pub use crate::signals::{Signal, SignalBus, SignalEnvelope};
pub use crate::sync::{DebounceFlusher, EditSync, KeyedEditCache, SyncStatusTracker};
pub use crate::workspace::{MutationCommand, NavDirection, ProjectWorkspace, ViewEvent};

use crate::models::EntityId;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const LOCAL_STORE_FILE: &str = "local.sqlite";

/// Opens the local store and settings under `app_data_dir` and loads the
/// project from `remote`.
pub async fn open_workspace(
    app_data_dir: &Path,
    project_id: EntityId,
    remote: Arc<dyn RemoteStore>,
) -> AppResult<Arc<ProjectWorkspace>> {
    std::fs::create_dir_all(app_data_dir)?;
    let config = SyncConfig::load(&app_data_dir.join(config::SETTINGS_FILE))?;
    let database = Arc::new(Database::new(&app_data_dir.join(LOCAL_STORE_FILE))?);
    tracing::info!(
        project_id,
        local_store = %database.path().display(),
        "opening workspace"
    );
    let workspace = ProjectWorkspace::new(project_id, remote, database, config);
    workspace.load().await?;
    Ok(workspace)
}

pub fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(errors::to_client_error)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "cora.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(errors::to_client_error)
}
