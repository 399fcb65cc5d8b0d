//! SQLite-backed persister.
//!
//! One table of path-keyed byte records, WAL mode for concurrent readers.
//! The scheduler is the sole writer; opening the store is how a process
//! asserts ownership of the framework's state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{child_names, Persister, PersisterError};

/// SQLite persister.
pub struct SqlitePersister {
    conn: Mutex<Connection>,
}

impl SqlitePersister {
    /// Opens or creates a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersisterError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, PersisterError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), PersisterError> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                path TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )?;
        debug!("Persister schema initialized");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-write; the connection state is
        // still consistent (SQLite owns the transaction boundary).
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Persister for SqlitePersister {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, PersisterError> {
        let conn = self.lock();
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE path = ?1",
                params![path],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, path: &str, value: &[u8]) -> Result<(), PersisterError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO records (path, value) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET value = excluded.value",
            params![path, value],
        )?;
        Ok(())
    }

    fn get_many(&self, paths: &[String]) -> Result<BTreeMap<String, Vec<u8>>, PersisterError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT value FROM records WHERE path = ?1")?;
        let mut found = BTreeMap::new();
        for path in paths {
            let value = stmt
                .query_row(params![path], |row| row.get::<_, Vec<u8>>(0))
                .optional()?;
            if let Some(value) = value {
                found.insert(path.clone(), value);
            }
        }
        Ok(found)
    }

    fn set_many(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), PersisterError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (path, value) in entries {
            tx.execute(
                "INSERT INTO records (path, value) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET value = excluded.value",
                params![path, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), PersisterError> {
        let conn = self.lock();
        conn.execute("DELETE FROM records WHERE path = ?1", params![path])?;
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), PersisterError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM records WHERE path = ?1 OR path LIKE ?2",
            params![prefix, format!("{prefix}/%")],
        )?;
        Ok(())
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>, PersisterError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT path FROM records WHERE path LIKE ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![format!("{prefix}/%")], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(child_names(prefix, paths.iter().map(String::as_str)))
    }
}
