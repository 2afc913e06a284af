//! SQLite implementation of the cache store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::traits::{CacheStore, CachedEntry, Namespace};
use crate::response::Response;

/// SQLite-based cache store. Every namespace lives in the same database.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store that lives only as long as this value.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One captured response per (namespace, request key)
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_namespace ON entries(namespace);
"#;

/// SHA256 of the canonical key, for a fixed-length index column.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

fn namespace_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM namespaces WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to look up namespace {}: {}", name, e))?;

  Ok(found.is_some())
}

fn insert_entry(conn: &Connection, namespace: &str, key: &str, response: &Response) -> Result<()> {
  if !response.is_success() {
    return Err(eyre!(
      "Refusing to cache status {} response for {}",
      response.status,
      key
    ));
  }

  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (namespace, key_hash, request_key, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        key_hash(key),
        key,
        response.status,
        response.status_text,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<Namespace> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create namespace {}: {}", name, e))?;

    Ok(Namespace::new(name))
  }

  fn match_entry(&self, namespace: &Namespace, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM entries
         WHERE namespace = ? AND key_hash = ?",
        params![namespace.name(), key_hash(key)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    let Some((status, status_text, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Corrupt headers for {}: {}", key, e))?;

    Ok(Some(CachedEntry {
      key: key.to_string(),
      response: Response {
        status,
        status_text,
        headers,
        body,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, namespace: &Namespace, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;

    // A late write must not resurrect a namespace deleted by activation
    if !namespace_exists(&conn, namespace.name())? {
      return Err(eyre!("Namespace {} no longer exists", namespace.name()));
    }

    insert_entry(&conn, namespace.name(), key, response)
  }

  fn put_all(&self, namespace: &Namespace, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
      params![namespace.name()],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace.name(), e))?;

    for (key, response) in entries {
      // Dropping `tx` on error rolls every earlier insert back
      insert_entry(&tx, namespace.name(), key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE namespace = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM namespaces WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn namespaces(&self) -> Result<BTreeSet<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM namespaces")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<BTreeSet<String>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  fn keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE namespace = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace.name()], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry row: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  const KEY: &str = "https://hymnal.example/hymnal_en.json";

  #[test]
  fn test_put_then_match() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = store.open("data-v1").unwrap();
    let response = Response::new(200, r#"{"page":1}"#).with_header("Content-Type", "application/json");

    store.put(&ns, KEY, &response).unwrap();

    let entry = store.match_entry(&ns, KEY).unwrap().unwrap();
    assert_eq!(entry.key, KEY);
    assert_eq!(entry.response, response);
    assert!(store.match_entry(&ns, "https://hymnal.example/other").unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_entry() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = store.open("data-v1").unwrap();

    store.put(&ns, KEY, &Response::new(200, "old")).unwrap();
    store.put(&ns, KEY, &Response::new(200, "new")).unwrap();

    assert_eq!(store.match_entry(&ns, KEY).unwrap().unwrap().response.body, b"new");
    assert_eq!(store.keys(&ns).unwrap(), vec![KEY.to_string()]);
  }

  #[test]
  fn test_non_success_never_stored() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = store.open("static-v1").unwrap();

    assert!(store.put(&ns, KEY, &Response::new(500, "boom")).is_err());
    assert!(store.put(&ns, KEY, &Response::new(404, "")).is_err());
    assert!(store.match_entry(&ns, KEY).unwrap().is_none());
  }

  #[test]
  fn test_namespaces_are_isolated() {
    let store = SqliteStore::in_memory().unwrap();
    let a = store.open("a").unwrap();
    let b = store.open("b").unwrap();

    store.put(&a, KEY, &Response::new(200, "a")).unwrap();
    assert!(store.match_entry(&b, KEY).unwrap().is_none());
  }

  #[test]
  fn test_put_all_is_all_or_nothing() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = Namespace::new("static-v2");
    let entries = vec![
      ("https://h/1".to_string(), Response::new(200, "1")),
      ("https://h/2".to_string(), Response::new(404, "missing")),
    ];

    assert!(store.put_all(&ns, &entries).is_err());
    assert!(!store.namespaces().unwrap().contains("static-v2"));

    let entries = vec![
      ("https://h/1".to_string(), Response::new(200, "1")),
      ("https://h/2".to_string(), Response::new(200, "2")),
    ];
    store.put_all(&ns, &entries).unwrap();
    assert_eq!(store.keys(&ns).unwrap().len(), 2);
  }

  #[test]
  fn test_delete_removes_namespace_and_entries() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = store.open("old-v1").unwrap();
    store.put(&ns, KEY, &Response::new(200, "x")).unwrap();

    assert!(store.delete("old-v1").unwrap());
    assert!(!store.delete("old-v1").unwrap());
    assert!(store.namespaces().unwrap().is_empty());
    assert!(store.match_entry(&ns, KEY).unwrap().is_none());
  }

  #[test]
  fn test_put_into_deleted_namespace_fails() {
    let store = SqliteStore::in_memory().unwrap();
    let ns = store.open("old-v1").unwrap();
    store.delete("old-v1").unwrap();

    assert!(store.put(&ns, KEY, &Response::new(200, "late")).is_err());
    assert!(store.namespaces().unwrap().is_empty());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      let ns = store.open("data-v1").unwrap();
      store.put(&ns, KEY, &Response::new(200, "kept")).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let ns = store.open("data-v1").unwrap();
    assert_eq!(store.match_entry(&ns, KEY).unwrap().unwrap().response.body, b"kept");
  }
}
