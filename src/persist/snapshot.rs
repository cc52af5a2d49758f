//! Snapshot document stored in the durable slot.
//!
//! ```text
//! {
//!   "version": "v1",
//!   "timestamp": 1717171717000,
//!   "queries": [
//!     { "queryKey": ["drinks", "list", "user-1"], "data": {...}, "dataUpdatedAt": 1717171700000 }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheValue, QueryCache, QueryKey};
use crate::codec;

/// One resolved query inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuery {
  pub query_key: QueryKey,
  pub data: CacheValue,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub data_updated_at: DateTime<Utc>,
}

/// A full, versioned export of every resolved cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub version: String,
  /// When the snapshot was taken
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
  pub queries: Vec<PersistedQuery>,
}

/// Just enough of a snapshot to decide whether to read the rest.
///
/// Parsed separately so a snapshot from another version is recognized even if
/// its entries no longer fit the current shape.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotHeader {
  pub version: String,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
}

impl Snapshot {
  /// Capture every query in `cache` that has resolved data.
  ///
  /// Pending, failed-without-data and never-run queries are left out. Order
  /// follows the cache's insertion order.
  pub fn capture(cache: &QueryCache, version: &str, now: DateTime<Utc>) -> Self {
    let queries = cache
      .all()
      .into_iter()
      .filter_map(|query| {
        let data = query.state.data?;
        let data_updated_at = query.state.data_updated_at?;
        Some(PersistedQuery {
          query_key: query.key,
          data,
          data_updated_at,
        })
      })
      .collect();

    Self {
      version: version.to_string(),
      timestamp: now,
      queries,
    }
  }

  pub fn encode(&self) -> Result<String> {
    codec::encode(self)
  }

  pub fn decode(text: &str) -> Result<Self> {
    codec::decode(text)
  }

  /// Time elapsed since the snapshot was taken.
  pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
    now - self.timestamp
  }
}

impl SnapshotHeader {
  pub fn decode(text: &str) -> Result<Self> {
    codec::decode(text)
  }
}
