//! Durable persistence for the query cache.
//!
//! The cache is written wholesale, as one versioned snapshot, into a single
//! slot of a key-value store. On startup the snapshot is read back and every
//! entry is seeded into the cache with its original resolution time.
//!
//! Persistence is an optimization only. Nothing here returns an error to the
//! live session: failures are logged and the app falls back to refetching.

mod restore;
mod scheduler;
mod snapshot;
mod storage;

pub use restore::{CacheRestorer, RestoreOutcome};
pub use scheduler::{LifecycleEvent, PersistOutcome, PersistenceScheduler};
pub use snapshot::{PersistedQuery, Snapshot, SnapshotHeader};
pub use storage::{DurableStore, MemoryStore, NoopStore, SnapshotSlot, SqliteStore};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::QueryCache;

/// Slot name used by the client.
pub const CACHE_KEY: &str = "BARKEEPLY_QUERY_CACHE";

/// Snapshot format version. Bumped whenever cached shapes change.
pub const CACHE_VERSION: &str = "v1";

/// Tuning for snapshot persistence.
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
  /// Slot name in the durable store
  pub storage_key: String,
  /// Expected snapshot version; anything else is ignored
  pub version: String,
  /// Snapshots older than this are discarded and cleared
  pub max_age: chrono::Duration,
  /// Quiet period after the last change before a write
  pub debounce: Duration,
}

impl Default for PersistenceOptions {
  fn default() -> Self {
    Self {
      storage_key: CACHE_KEY.to_string(),
      version: CACHE_VERSION.to_string(),
      max_age: chrono::Duration::hours(24),
      debounce: Duration::from_secs(5),
    }
  }
}

/// Wired-up persistence for one cache: restored, listening, ready to flush.
pub struct CachePersistence<S: DurableStore + 'static> {
  scheduler: PersistenceScheduler<S>,
  listener: JoinHandle<()>,
  restored: RestoreOutcome,
}

impl<S: DurableStore + 'static> CachePersistence<S> {
  /// Restore `cache` from `store`, then start persisting its changes.
  ///
  /// Call once at startup, from within a tokio runtime. The restore happens
  /// before the change listener subscribes, so seeding the cache does not
  /// immediately schedule a write.
  pub fn setup(cache: Arc<QueryCache>, store: Arc<S>, options: &PersistenceOptions) -> Self {
    let slot = SnapshotSlot::new(store, options.storage_key.clone());

    let restored = CacheRestorer::new(slot.clone(), options).restore(&cache);
    tracing::debug!(outcome = %restored, "Query cache restore finished");

    let scheduler = PersistenceScheduler::new(cache, slot, options);
    let listener = scheduler.listen();

    Self {
      scheduler,
      listener,
      restored,
    }
  }

  /// What the startup restore did.
  pub fn restore_outcome(&self) -> &RestoreOutcome {
    &self.restored
  }

  pub fn scheduler(&self) -> &PersistenceScheduler<S> {
    &self.scheduler
  }

  /// Forward an app lifecycle transition.
  pub fn handle_lifecycle(&self, event: LifecycleEvent) -> Option<PersistOutcome> {
    self.scheduler.handle_lifecycle(event)
  }

  /// Write the current cache now.
  pub fn flush(&self) -> PersistOutcome {
    self.scheduler.persist_now()
  }

  /// Stop listening and write a final snapshot.
  pub fn shutdown(self) -> PersistOutcome {
    self.listener.abort();
    self.scheduler.cancel_pending();
    tracing::debug!("Persisting query cache on shutdown");
    self.scheduler.persist_now()
  }
}

impl<S: DurableStore + 'static> Drop for CachePersistence<S> {
  /// Stops the change listener. An armed debounce timer still fires.
  fn drop(&mut self) {
    self.listener.abort();
  }
}
