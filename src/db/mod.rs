use crate::errors::{AppError, AppResult};
use crate::kv::KeyValueStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite-backed local key-value store. Holds the mirror of unsynced field
/// edits plus small UI state (selection, expanded folders, draft markers).
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn count_entries(&self) -> AppResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM local_kv", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM local_kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO local_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM local_kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM local_kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt.query_map([prefix], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::kv::KeyValueStore;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("local.sqlite");
        {
            let db = Database::new(&db_path).expect("db");
            db.set("cora-field:doc-text:1", "unsynced prose").expect("set");
        }
        let db = Database::new(&db_path).expect("reopen");
        assert_eq!(
            db.get("cora-field:doc-text:1").expect("get").as_deref(),
            Some("unsynced prose")
        );
    }

    #[test]
    fn set_overwrites_and_remove_deletes() {
        let db = Database::open_in_memory().expect("db");
        db.set("k", "one").expect("set");
        db.set("k", "two").expect("overwrite");
        assert_eq!(db.get("k").expect("get").as_deref(), Some("two"));
        assert_eq!(db.count_entries().expect("count"), 1);
        db.remove("k").expect("remove");
        assert!(db.get("k").expect("get").is_none());
    }

    #[test]
    fn prefix_scan_is_literal() {
        let db = Database::open_in_memory().expect("db");
        db.set("cora-field:doc-notes:2", "n").expect("set");
        db.set("cora-field:draft:doc:9", "d").expect("set");
        db.set("cora-fieldx", "noise").expect("set");
        db.set("cora-active-draft:doc", "9").expect("set");
        let keys = db.keys_with_prefix("cora-field:").expect("scan");
        assert_eq!(keys, vec!["cora-field:doc-notes:2", "cora-field:draft:doc:9"]);
    }
}
