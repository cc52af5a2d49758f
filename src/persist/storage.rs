//! Durable key-value storage and the snapshot slot.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Synchronous string key-value storage.
///
/// Writes replace the whole value. Implementations should fail a `set` that
/// would exceed their capacity rather than store a truncated value.
pub trait DurableStore: Send + Sync {
  /// Read the value under `key`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Delete `key`. Deleting a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}

/// Store that keeps nothing.
/// Backs the CLI when persistence is disabled - all operations are no-ops.
pub struct NoopStore;

impl DurableStore for NoopStore {
  fn get(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always absent
  }

  fn set(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }
}

/// In-process store with an optional size quota.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, String>>,
  quota_bytes: Option<usize>,
  writes: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the total size of keys plus values.
  pub fn with_quota(mut self, quota_bytes: usize) -> Self {
    self.quota_bytes = Some(quota_bytes);
    self
  }

  /// Number of successful `set` calls so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl DurableStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(quota) = self.quota_bytes {
      let others: usize = values
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      check_quota(quota, others + key.len() + value.len())?;
    }

    values.insert(key.to_string(), value.to_string());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.remove(key);
    Ok(())
  }
}

fn check_quota(quota: usize, needed: usize) -> Result<()> {
  if needed > quota {
    return Err(eyre!(
      "Storage quota exceeded: {} bytes needed, {} allowed",
      needed,
      quota
    ));
  }
  Ok(())
}

/// SQLite-backed store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  quota_bytes: Option<usize>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota_bytes: None,
    })
  }

  /// Limit the total size of keys plus values.
  pub fn with_quota(mut self, quota_bytes: usize) -> Self {
    self.quota_bytes = Some(quota_bytes);
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("barkeep").join("cache.db"))
  }
}

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl DurableStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read '{}': {}", key, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(quota) = self.quota_bytes {
      let others: i64 = conn
        .query_row(
          "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
           FROM kv_store WHERE key != ?",
          params![key],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to measure cache usage: {}", e))?;
      let others = usize::try_from(others).unwrap_or(usize::MAX);
      check_quota(quota, others.saturating_add(key.len() + value.len()))?;
    }

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write '{}': {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove '{}': {}", key, e))?;

    Ok(())
  }
}

/// One named slot in a durable store.
///
/// The slot holds a single encoded snapshot and knows nothing about its
/// contents.
pub struct SnapshotSlot<S: DurableStore> {
  store: Arc<S>,
  key: String,
}

impl<S: DurableStore> SnapshotSlot<S> {
  pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
    Self {
      store,
      key: key.into(),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn read(&self) -> Result<Option<String>> {
    self.store.get(&self.key)
  }

  pub fn write(&self, text: &str) -> Result<()> {
    self.store.set(&self.key, text)
  }

  pub fn clear(&self) -> Result<()> {
    self.store.remove(&self.key)
  }
}

impl<S: DurableStore> Clone for SnapshotSlot<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      key: self.key.clone(),
    }
  }
}
