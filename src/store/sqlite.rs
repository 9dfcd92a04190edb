//! On-disk store backed by SQLite.

use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::store::KvStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        init_db(&conn, true)?;
        tracing::debug!(path = ?path.as_ref(), "Opened sqlite store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn, false)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn init_db(conn: &Connection, on_disk: bool) -> rusqlite::Result<()> {
    if on_disk {
        // The log is the source of truth, a lost tail is replayed on restart.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key BLOB PRIMARY KEY,
            value BLOB NOT NULL
        ) WITHOUT ROWID",
        [],
    )?;

    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let conn = self.conn.lock();
        let value: Option<Vec<u8>> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.map(Bytes::from))
    }

    fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.as_ref(), value.as_ref()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn range_after(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        let conn = self.conn.lock();
        let limit = limit as i64;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(Bytes, Bytes)> {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            Ok((Bytes::from(key), Bytes::from(value)))
        };

        let mut entries = Vec::new();
        match after {
            Some(after) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, value FROM kv WHERE key > ?1 ORDER BY key LIMIT ?2",
                )?;
                for entry in stmt.query_map(params![after, limit], map_row)? {
                    entries.push(entry?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached("SELECT key, value FROM kv ORDER BY key LIMIT ?1")?;
                for entry in stmt.query_map(params![limit], map_row)? {
                    entries.push(entry?);
                }
            }
        }
        Ok(entries)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_ordered_range() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(Bytes::from("b"), Bytes::from("1")).unwrap();
        store.put(Bytes::from("a"), Bytes::from("1")).unwrap();
        store.put(Bytes::from("b"), Bytes::from("2")).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get(b"b").unwrap(), Some(Bytes::from("2")));
        assert_eq!(store.get(b"zz").unwrap(), None);

        let all = store.range_after(None, 10).unwrap();
        assert_eq!(all[0].0, Bytes::from("a"));
        let rest = store.range_after(Some(b"a"), 10).unwrap();
        assert_eq!(rest, vec![(Bytes::from("b"), Bytes::from("2"))]);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(Bytes::from("k"), Bytes::from("v")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(Bytes::from("v")));
        assert!(store.delete(b"k").unwrap());
        assert!(store.is_empty().unwrap());
    }
}
