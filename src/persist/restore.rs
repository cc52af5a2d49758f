//! Cold-start restore of the query cache from the durable slot.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::cache::QueryCache;

use super::snapshot::{Snapshot, SnapshotHeader};
use super::storage::{DurableStore, SnapshotSlot};
use super::PersistenceOptions;

/// What a restore attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
  /// Nothing stored
  Absent,
  /// Stored text could not be read or parsed. Treated as absent.
  Corrupt,
  /// Written by another version. Left in place.
  VersionMismatch { found: String },
  /// Older than the maximum age. The slot was cleared.
  Expired { age: chrono::Duration },
  /// Entries were seeded into the cache
  Restored { entries: usize },
}

impl RestoreOutcome {
  /// Number of entries seeded into the cache.
  pub fn restored(&self) -> usize {
    match self {
      RestoreOutcome::Restored { entries } => *entries,
      _ => 0,
    }
  }
}

impl fmt::Display for RestoreOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RestoreOutcome::Absent => write!(f, "no cached snapshot"),
      RestoreOutcome::Corrupt => write!(f, "cached snapshot is unreadable"),
      RestoreOutcome::VersionMismatch { found } => {
        write!(f, "cached snapshot has version {:?}, ignored", found)
      }
      RestoreOutcome::Expired { age } => {
        write!(f, "cached snapshot expired ({}h old), cleared", age.num_hours())
      }
      RestoreOutcome::Restored { entries } => write!(f, "restored {} cached queries", entries),
    }
  }
}

/// Loads the last snapshot and seeds the in-memory cache with it.
pub struct CacheRestorer<S: DurableStore> {
  slot: SnapshotSlot<S>,
  version: String,
  max_age: chrono::Duration,
}

impl<S: DurableStore> CacheRestorer<S> {
  pub fn new(slot: SnapshotSlot<S>, options: &PersistenceOptions) -> Self {
    Self {
      slot,
      version: options.version.clone(),
      max_age: options.max_age,
    }
  }

  /// Restore into `cache` as of now.
  pub fn restore(&self, cache: &QueryCache) -> RestoreOutcome {
    self.restore_at(cache, Utc::now())
  }

  /// Restore into `cache`, judging snapshot age against `now`.
  ///
  /// Never fails: every problem degrades to a cold start. Each entry keeps its
  /// original `dataUpdatedAt`, so restored data is exactly as stale as it was
  /// when written.
  pub fn restore_at(&self, cache: &QueryCache, now: DateTime<Utc>) -> RestoreOutcome {
    let snapshot = match self.load(now, true) {
      Ok(snapshot) => snapshot,
      Err(outcome) => return outcome,
    };

    let entries = snapshot.queries.len();
    for query in snapshot.queries {
      cache.set_query_data(&query.query_key, query.data, query.data_updated_at);
    }

    tracing::info!(entries, "Restored cached queries");
    RestoreOutcome::Restored { entries }
  }

  /// Run the restore checks without seeding a cache or clearing the slot.
  ///
  /// `Restored` here counts the entries a restore would seed.
  pub fn check_at(&self, now: DateTime<Utc>) -> RestoreOutcome {
    match self.load(now, false) {
      Ok(snapshot) => RestoreOutcome::Restored {
        entries: snapshot.queries.len(),
      },
      Err(outcome) => outcome,
    }
  }

  /// Read and gate the stored snapshot. `Err` carries why nothing is usable.
  fn load(&self, now: DateTime<Utc>, clear_expired: bool) -> Result<Snapshot, RestoreOutcome> {
    let text = match self.slot.read() {
      Ok(Some(text)) => text,
      Ok(None) => return Err(RestoreOutcome::Absent),
      Err(e) => {
        tracing::warn!(error = %e, "Failed to read query cache");
        return Err(RestoreOutcome::Corrupt);
      }
    };

    let header = SnapshotHeader::decode(&text).map_err(|e| {
      tracing::warn!(error = %e, "Failed to restore query cache");
      RestoreOutcome::Corrupt
    })?;

    if header.version != self.version {
      tracing::debug!(
        found = %header.version,
        expected = %self.version,
        "Ignoring query cache from another version"
      );
      return Err(RestoreOutcome::VersionMismatch {
        found: header.version,
      });
    }

    let age = now - header.timestamp;
    if age > self.max_age {
      if clear_expired {
        if let Err(e) = self.slot.clear() {
          tracing::warn!(error = %e, "Failed to clear expired query cache");
        }
        tracing::debug!(age_secs = age.num_seconds(), "Discarded expired query cache");
      }
      return Err(RestoreOutcome::Expired { age });
    }

    Snapshot::decode(&text).map_err(|e| {
      tracing::warn!(error = %e, "Failed to restore query cache");
      RestoreOutcome::Corrupt
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheValue, QueryKey};
  use crate::persist::storage::{DurableStore, MemoryStore};
  use chrono::Duration;
  use std::sync::Arc;

  const SLOT: &str = "TEST_CACHE";

  /// Current time at the millisecond precision the slot stores.
  fn now_ms() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
  }

  fn setup() -> (Arc<MemoryStore>, CacheRestorer<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let options = PersistenceOptions {
      storage_key: SLOT.to_string(),
      ..PersistenceOptions::default()
    };
    let restorer = CacheRestorer::new(SnapshotSlot::new(Arc::clone(&store), SLOT), &options);
    (store, restorer)
  }

  fn write_snapshot(store: &MemoryStore, version: &str, timestamp: DateTime<Utc>) {
    let cache = QueryCache::new();
    cache.set_query_data(
      &QueryKey::from(["drinks", "list", "user-1"]),
      CacheValue::object([("count", CacheValue::from(3i64))]),
      timestamp - Duration::minutes(10),
    );
    let text = Snapshot::capture(&cache, version, timestamp).encode().unwrap();
    store.set(SLOT, &text).unwrap();
  }

  #[test]
  fn test_absent_slot_is_a_no_op() {
    let (_store, restorer) = setup();
    let cache = QueryCache::new();
    assert_eq!(restorer.restore(&cache), RestoreOutcome::Absent);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_restores_entries_with_original_timestamps() {
    let (store, restorer) = setup();
    let now = now_ms();
    write_snapshot(&store, "v1", now - Duration::hours(1));

    let cache = QueryCache::new();
    assert_eq!(
      restorer.restore_at(&cache, now),
      RestoreOutcome::Restored { entries: 1 }
    );

    let query = cache.get(&QueryKey::from(["drinks", "list", "user-1"])).unwrap();
    assert_eq!(
      query.state.data_updated_at,
      Some(now - Duration::hours(1) - Duration::minutes(10))
    );
    // Resolved 70 minutes ago: stale under a 5 minute window, as before the restart
    assert!(query.is_stale_at(Duration::minutes(5), now));
    assert!(!query.is_stale_at(Duration::hours(2), now));
  }

  #[test]
  fn test_version_mismatch_leaves_slot_untouched() {
    let (store, restorer) = setup();
    write_snapshot(&store, "v0", Utc::now());

    let cache = QueryCache::new();
    assert_eq!(
      restorer.restore(&cache),
      RestoreOutcome::VersionMismatch {
        found: "v0".to_string()
      }
    );
    assert!(cache.is_empty());
    assert!(store.get(SLOT).unwrap().is_some());
  }

  #[test]
  fn test_version_checked_before_age() {
    let (store, restorer) = setup();
    write_snapshot(&store, "v0", Utc::now() - Duration::hours(48));

    let cache = QueryCache::new();
    assert!(matches!(
      restorer.restore(&cache),
      RestoreOutcome::VersionMismatch { .. }
    ));
    assert!(store.get(SLOT).unwrap().is_some());
  }

  #[test]
  fn test_expired_snapshot_is_cleared() {
    let (store, restorer) = setup();
    let now = now_ms();
    write_snapshot(&store, "v1", now - Duration::hours(25));

    let cache = QueryCache::new();
    let outcome = restorer.restore_at(&cache, now);
    assert_eq!(outcome, RestoreOutcome::Expired { age: Duration::hours(25) });
    assert!(cache.is_empty());
    assert_eq!(store.get(SLOT).unwrap(), None);
  }

  #[test]
  fn test_snapshot_just_inside_max_age_is_restored() {
    let (store, restorer) = setup();
    let now = now_ms();
    write_snapshot(&store, "v1", now - Duration::hours(23));

    let cache = QueryCache::new();
    assert_eq!(restorer.restore_at(&cache, now).restored(), 1);
  }

  #[test]
  fn test_corrupt_slot_is_treated_as_absent() {
    let (store, restorer) = setup();
    store.set(SLOT, "{\"version\":\"v1\",").unwrap();

    let cache = QueryCache::new();
    assert_eq!(restorer.restore(&cache), RestoreOutcome::Corrupt);
    assert!(cache.is_empty());
    // Corrupt data is not cleared, only ignored
    assert!(store.get(SLOT).unwrap().is_some());
  }

  #[test]
  fn test_bad_entries_in_current_version_are_corrupt() {
    let (store, restorer) = setup();
    let text = format!(
      r#"{{"version":"v1","timestamp":{},"queries":[{{"queryKey":"nope"}}]}}"#,
      Utc::now().timestamp_millis()
    );
    store.set(SLOT, &text).unwrap();

    let cache = QueryCache::new();
    assert_eq!(restorer.restore(&cache), RestoreOutcome::Corrupt);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_check_leaves_expired_slot_in_place() {
    let (store, restorer) = setup();
    let now = now_ms();
    write_snapshot(&store, "v1", now - Duration::hours(25));

    assert_eq!(
      restorer.check_at(now),
      RestoreOutcome::Expired { age: Duration::hours(25) }
    );
    assert!(store.get(SLOT).unwrap().is_some());
  }

  #[test]
  fn test_check_counts_entries_without_seeding() {
    let (store, restorer) = setup();
    let now = now_ms();
    write_snapshot(&store, "v1", now - Duration::hours(1));

    assert_eq!(restorer.check_at(now), RestoreOutcome::Restored { entries: 1 });
    assert_eq!(store.write_count(), 1);
    assert!(store.get(SLOT).unwrap().is_some());
  }
}
