//! Decides when the cache gets written to the durable slot.
//!
//! Three triggers:
//! - the app is hidden: write now
//! - the app is torn down: write now
//! - any cache change: (re)arm a debounce timer and write once it expires
//!
//! A burst of changes (a dozen queries resolving on launch) therefore costs a
//! single write. Immediate writes ignore the timer; a second identical write
//! is harmless.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::cache::QueryCache;

use super::snapshot::Snapshot;
use super::storage::{DurableStore, SnapshotSlot};
use super::PersistenceOptions;

/// App lifecycle transitions the scheduler reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// App moved to the background
  Hidden,
  /// App came back to the foreground
  Visible,
  /// App is shutting down
  Teardown,
}

/// Result of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
  Written { entries: usize, bytes: usize },
  /// The snapshot could not be encoded; nothing was written
  EncodeFailed,
  /// The store rejected the write
  StoreFailed,
}

/// Coalescing writer for cache snapshots.
///
/// Cloning gives another handle to the same scheduler.
pub struct PersistenceScheduler<S: DurableStore + 'static> {
  inner: Arc<SchedulerInner<S>>,
}

struct SchedulerInner<S: DurableStore> {
  cache: Arc<QueryCache>,
  slot: SnapshotSlot<S>,
  version: String,
  debounce: Duration,
  /// At most one armed debounce timer
  pending: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DurableStore + 'static> PersistenceScheduler<S> {
  pub fn new(cache: Arc<QueryCache>, slot: SnapshotSlot<S>, options: &PersistenceOptions) -> Self {
    Self {
      inner: Arc::new(SchedulerInner {
        cache,
        slot,
        version: options.version.clone(),
        debounce: options.debounce,
        pending: Mutex::new(None),
      }),
    }
  }

  /// Write a snapshot of the current cache immediately.
  pub fn persist_now(&self) -> PersistOutcome {
    self.inner.persist()
  }

  /// Note a cache change: cancel any armed timer and start a new one.
  ///
  /// Must be called from within a tokio runtime.
  pub fn notify_change(&self) {
    let mut pending = self.inner.lock_pending();
    if let Some(handle) = pending.take() {
      handle.abort();
    }

    let inner = Arc::clone(&self.inner);
    *pending = Some(tokio::spawn(async move {
      tokio::time::sleep(inner.debounce).await;
      inner.persist();
    }));
  }

  /// Whether a debounced write is armed and has not run yet.
  pub fn has_pending(&self) -> bool {
    self
      .inner
      .lock_pending()
      .as_ref()
      .is_some_and(|handle| !handle.is_finished())
  }

  /// Drop the armed timer, if any, without writing.
  pub fn cancel_pending(&self) {
    if let Some(handle) = self.inner.lock_pending().take() {
      handle.abort();
    }
  }

  /// React to a lifecycle transition. Returns the write outcome if one ran.
  pub fn handle_lifecycle(&self, event: LifecycleEvent) -> Option<PersistOutcome> {
    match event {
      LifecycleEvent::Hidden | LifecycleEvent::Teardown => {
        tracing::debug!(?event, "Persisting query cache");
        Some(self.persist_now())
      }
      LifecycleEvent::Visible => None,
    }
  }

  /// Spawn a task that arms the debounce timer on every cache change.
  ///
  /// The subscription is taken before this returns, so no change made after
  /// the call is missed. The task runs until its handle is aborted.
  pub fn listen(&self) -> JoinHandle<()> {
    let mut events = self.inner.cache.subscribe();
    let scheduler = self.clone();

    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(_) => scheduler.notify_change(),
          Err(RecvError::Lagged(skipped)) => {
            tracing::trace!(skipped, "Cache events lagged");
            scheduler.notify_change();
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }
}

impl<S: DurableStore + 'static> Clone for PersistenceScheduler<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S: DurableStore> SchedulerInner<S> {
  fn lock_pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Build, encode and store a snapshot. Failures are logged, never raised.
  fn persist(&self) -> PersistOutcome {
    let snapshot = Snapshot::capture(&self.cache, &self.version, Utc::now());
    let entries = snapshot.queries.len();

    let text = match snapshot.encode() {
      Ok(text) => text,
      Err(e) => {
        tracing::warn!(error = %e, "Failed to save query cache");
        return PersistOutcome::EncodeFailed;
      }
    };

    if let Err(e) = self.slot.write(&text) {
      tracing::warn!(error = %e, bytes = text.len(), "Failed to save query cache");
      return PersistOutcome::StoreFailed;
    }

    tracing::debug!(entries, bytes = text.len(), "Saved query cache");
    PersistOutcome::Written {
      entries,
      bytes: text.len(),
    }
  }
}
