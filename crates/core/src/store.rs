// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key-value persistence for queue and conflict records.
//!
//! The engine only needs atomic put/get/delete and a scan that returns
//! entries in first-insertion order. [`SqliteStore`] is the durable
//! implementation; [`MemoryStore`] backs tests and ephemeral engines.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// A namespaced key-value store.
///
/// Each call must be atomic: after a crash a key holds either its previous
/// value or the new one, never a partial write. Overwriting an existing key
/// keeps its original position in scan order.
pub trait KvStore: Send + Sync {
    /// Inserts or overwrites a value.
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Reads a value.
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a value. Returns true if it existed.
    fn delete(&self, ns: &str, key: &str) -> Result<bool>;

    /// Returns every entry in a namespace, oldest insertion first.
    fn scan(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(ns, key, value)
    }

    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(ns, key)
    }

    fn delete(&self, ns: &str, key: &str) -> Result<bool> {
        (**self).delete(ns, key)
    }

    fn scan(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).scan(ns)
    }
}

/// SQL schema for the key-value table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    ns TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (ns, key)
);

CREATE INDEX IF NOT EXISTS idx_kv_seq ON kv(ns, seq);
"#;

/// SQLite-backed store.
///
/// `rusqlite::Connection` is not `Sync`, so access is serialized through a
/// mutex. Statements are short and never held across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL for concurrent readers; FULL sync so a committed put survives power loss
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for SqliteStore {
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()> {
        // Single statement: the upsert and the sequence allocation commit together
        self.conn().execute(
            "INSERT INTO kv (ns, key, value, seq)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv))
             ON CONFLICT(ns, key) DO UPDATE SET value = excluded.value",
            params![ns, key, value],
        )?;
        Ok(())
    }

    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE ns = ?1 AND key = ?2", params![ns, key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn delete(&self, ns: &str, key: &str) -> Result<bool> {
        let affected =
            self.conn().execute("DELETE FROM kv WHERE ns = ?1 AND key = ?2", params![ns, key])?;
        Ok(affected > 0)
    }

    fn scan(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM kv WHERE ns = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![ns], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// In-memory store preserving insertion order per namespace.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        let entries = namespaces.entry(ns.to_string()).or_default();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_vec(),
            None => entries.push((key.to_string(), value.to_vec())),
        }
        Ok(())
    }

    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(namespaces
            .get(ns)
            .and_then(|entries| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.clone()))
    }

    fn delete(&self, ns: &str, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = namespaces.get_mut(ns) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() != before)
    }

    fn scan(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(namespaces.get(ns).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
