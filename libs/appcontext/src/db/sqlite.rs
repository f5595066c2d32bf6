//! SQLite-backed context store.
//!
//! Contexts survive process restarts, so a terminate call in a later run can
//! still load the tree an earlier instantiate built.

use std::path::Path;
use std::sync::Mutex;

use emco_id::ContextId;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{ContextDb, ContextDbError};

/// Context store holding one row per context.
pub struct SqliteContextDb {
    conn: Mutex<Connection>,
}

impl SqliteContextDb {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContextDbError> {
        let conn = Connection::open(path)?;

        // WAL keeps readers from blocking the writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, ContextDbError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), ContextDbError> {
        let conn = self.conn.lock().map_err(|_| ContextDbError::Poisoned)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contexts (
                context_id TEXT PRIMARY KEY,
                tree TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        debug!("Context store schema initialized");
        Ok(())
    }

    /// IDs of all stored contexts, most recently updated last.
    pub fn list(&self) -> Result<Vec<String>, ContextDbError> {
        let conn = self.conn.lock().map_err(|_| ContextDbError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT context_id FROM contexts ORDER BY updated_at")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl ContextDb for SqliteContextDb {
    fn put(&self, id: &ContextId, tree: &str) -> Result<(), ContextDbError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().map_err(|_| ContextDbError::Poisoned)?;
        conn.execute(
            r#"
            INSERT INTO contexts (context_id, tree, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(context_id) DO UPDATE SET
                tree = excluded.tree,
                updated_at = excluded.updated_at
            "#,
            params![id.to_string(), tree, now],
        )?;
        Ok(())
    }

    fn get(&self, id: &ContextId) -> Result<Option<String>, ContextDbError> {
        let conn = self.conn.lock().map_err(|_| ContextDbError::Poisoned)?;
        conn.query_row(
            "SELECT tree FROM contexts WHERE context_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    fn delete(&self, id: &ContextId) -> Result<(), ContextDbError> {
        let conn = self.conn.lock().map_err(|_| ContextDbError::Poisoned)?;
        conn.execute(
            "DELETE FROM contexts WHERE context_id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_db_upsert_and_delete() {
        let db = SqliteContextDb::open_in_memory().unwrap();
        let id = ContextId::new();

        db.put(&id, "{\"v\":1}").unwrap();
        db.put(&id, "{\"v\":2}").unwrap();
        assert_eq!(db.get(&id).unwrap().as_deref(), Some("{\"v\":2}"));
        assert_eq!(db.list().unwrap(), vec![id.to_string()]);

        db.delete(&id).unwrap();
        assert!(db.get(&id).unwrap().is_none());
        assert!(!db.contains(&id).unwrap());
    }

    #[test]
    fn test_sqlite_db_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contexts.db");
        let id = ContextId::new();

        {
            let db = SqliteContextDb::open(&path).unwrap();
            db.put(&id, "persisted").unwrap();
        }

        let db = SqliteContextDb::open(&path).unwrap();
        assert_eq!(db.get(&id).unwrap().as_deref(), Some("persisted"));
    }
}
