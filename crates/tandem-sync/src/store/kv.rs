//! Key-value substrate behind the durable queue and conflict history.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::migrations;

/// Namespaced key-value storage seam.
///
/// Documents are opaque JSON strings; each `put` is atomic, so a partially
/// written record is never observable. `list` returns records in their
/// original insertion order, surviving process restarts.
pub trait KvStore: Send + Sync {
    /// Insert or overwrite a document. Overwrites keep the original insertion order.
    fn put(&self, namespace: &str, key: &str, document: &str) -> Result<()>;

    /// Fetch a document by key.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// List all documents in a namespace in insertion order.
    fn list(&self, namespace: &str) -> Result<Vec<(String, String)>>;

    /// Remove a document. Removing a missing key is a no-op.
    fn delete(&self, namespace: &str, key: &str) -> Result<()>;
}

/// `SQLite`-backed implementation of [`KvStore`]
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open a store at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("cannot create data directory: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("connection mutex poisoned".into()))
    }
}

/// Configure `SQLite` for durability and concurrency
fn configure(conn: &Connection) -> Result<()> {
    // WAL may be unsupported on some filesystems; fall back silently
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

impl KvStore for SqliteKvStore {
    fn put(&self, namespace: &str, key: &str, document: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_records (namespace, key, document) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, key) DO UPDATE SET document = excluded.document",
            params![namespace, key, document],
        )?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let document = conn
            .query_row(
                "SELECT document FROM kv_records WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(document)
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, document FROM kv_records WHERE namespace = ?1 ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map(params![namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM kv_records WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> SqliteKvStore {
        SqliteKvStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_put_get() {
        let kv = setup();
        kv.put("queue", "a", r#"{"x":1}"#).unwrap();

        let doc = kv.get("queue", "a").unwrap();
        assert_eq!(doc.as_deref(), Some(r#"{"x":1}"#));

        assert!(kv.get("queue", "missing").unwrap().is_none());
        assert!(kv.get("other", "a").unwrap().is_none());
    }

    #[test]
    fn test_list_insertion_order() {
        let kv = setup();
        kv.put("queue", "b", "2").unwrap();
        kv.put("queue", "a", "1").unwrap();
        kv.put("queue", "c", "3").unwrap();

        let keys: Vec<String> = kv
            .list("queue")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_overwrite_keeps_order() {
        let kv = setup();
        kv.put("queue", "a", "1").unwrap();
        kv.put("queue", "b", "2").unwrap();
        kv.put("queue", "a", "updated").unwrap();

        let records = kv.list("queue").unwrap();
        assert_eq!(records[0], ("a".to_string(), "updated".to_string()));
        assert_eq!(records[1], ("b".to_string(), "2".to_string()));
    }

    #[test]
    fn test_delete() {
        let kv = setup();
        kv.put("queue", "a", "1").unwrap();
        kv.delete("queue", "a").unwrap();

        assert!(kv.get("queue", "a").unwrap().is_none());
        // Deleting again is a no-op
        kv.delete("queue", "a").unwrap();
    }

    #[test]
    fn test_namespaces_isolated() {
        let kv = setup();
        kv.put("queue", "a", "1").unwrap();
        kv.put("conflicts", "a", "2").unwrap();

        assert_eq!(kv.list("queue").unwrap().len(), 1);
        assert_eq!(kv.get("conflicts", "a").unwrap().as_deref(), Some("2"));

        kv.delete("queue", "a").unwrap();
        assert_eq!(kv.get("conflicts", "a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tandem.db");

        {
            let kv = SqliteKvStore::open(&path).unwrap();
            kv.put("queue", "a", "1").unwrap();
            kv.put("queue", "b", "2").unwrap();
            kv.delete("queue", "a").unwrap();
        }

        let kv = SqliteKvStore::open(&path).unwrap();
        let records = kv.list("queue").unwrap();
        assert_eq!(records, vec![("b".to_string(), "2".to_string())]);
    }
}
