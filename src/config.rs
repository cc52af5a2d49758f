use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::QueryOptions;
use crate::persist::{PersistenceOptions, SqliteStore, CACHE_KEY, CACHE_VERSION};

/// Environment variable overriding the cache database location.
pub const CACHE_DB_ENV: &str = "BARKEEP_CACHE_DB";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub persistence: PersistenceConfig,
  #[serde(default)]
  pub queries: QueriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
  /// Set to false to keep the cache in memory only
  pub enabled: bool,
  pub storage_key: String,
  pub version: String,
  pub max_age_secs: u64,
  pub debounce_ms: u64,
  /// SQLite file holding the snapshot (defaults to the user data directory)
  pub database_path: Option<PathBuf>,
  /// Refuse snapshots larger than this many bytes
  pub quota_bytes: Option<usize>,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      storage_key: CACHE_KEY.to_string(),
      version: CACHE_VERSION.to_string(),
      max_age_secs: 24 * 60 * 60,
      debounce_ms: 5_000,
      database_path: None,
      quota_bytes: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueriesConfig {
  pub stale_time_secs: u64,
  pub gc_time_secs: u64,
  pub retry: u32,
}

impl Default for QueriesConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: 5 * 60,
      gc_time_secs: 24 * 60 * 60,
      retry: 3,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./barkeep.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/barkeep/config.yaml
  ///
  /// Without a file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("barkeep.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("barkeep").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Cache database location: environment, then config, then the default.
  pub fn database_path(&self) -> Option<PathBuf> {
    std::env::var_os(CACHE_DB_ENV)
      .map(PathBuf::from)
      .or_else(|| self.persistence.database_path.clone())
  }

  /// Open the configured SQLite store.
  pub fn open_store(&self) -> Result<SqliteStore> {
    let store = match self.database_path() {
      Some(path) => SqliteStore::open_at(&path)?,
      None => SqliteStore::open()?,
    };

    Ok(match self.persistence.quota_bytes {
      Some(quota) => store.with_quota(quota),
      None => store,
    })
  }

  pub fn persistence_options(&self) -> PersistenceOptions {
    PersistenceOptions {
      storage_key: self.persistence.storage_key.clone(),
      version: self.persistence.version.clone(),
      max_age: chrono::Duration::seconds(secs_i64(self.persistence.max_age_secs)),
      debounce: Duration::from_millis(self.persistence.debounce_ms),
    }
  }

  pub fn query_options(&self) -> QueryOptions {
    QueryOptions {
      stale_time: chrono::Duration::seconds(secs_i64(self.queries.stale_time_secs)),
      gc_time: chrono::Duration::seconds(secs_i64(self.queries.gc_time_secs)),
      retry: self.queries.retry,
      ..QueryOptions::default()
    }
  }
}

/// Clamp to a range chrono accepts without panicking.
fn secs_i64(secs: u64) -> i64 {
  const MAX_SECS: i64 = i64::MAX / 1_000;
  i64::try_from(secs).unwrap_or(MAX_SECS).min(MAX_SECS)
}
