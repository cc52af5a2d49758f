//! In-memory query cache.
//!
//! One instance per process, constructed explicitly and shared through an
//! `Arc`. Every mutation is announced on a broadcast channel so the
//! persistence scheduler can react without the cache knowing about it.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use super::key::QueryKey;
use super::value::CacheValue;

const EVENT_CAPACITY: usize = 256;

/// Resolution status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never resolved (fetch in flight or not yet started)
  Pending,
  /// Resolved with data at least once
  Success,
  /// Last fetch failed
  Error,
}

/// State tracked for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
  pub status: QueryStatus,
  /// Last successfully resolved data. Kept across later failures.
  pub data: Option<CacheValue>,
  /// When `data` was resolved
  pub data_updated_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
  pub error_updated_at: Option<DateTime<Utc>>,
  pub fetch_failure_count: u32,
  /// Marked stale regardless of age
  pub is_invalidated: bool,
}

impl QueryState {
  fn pending() -> Self {
    Self {
      status: QueryStatus::Pending,
      data: None,
      data_updated_at: None,
      error: None,
      error_updated_at: None,
      fetch_failure_count: 0,
      is_invalidated: false,
    }
  }
}

/// A query tracked by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
  pub key: QueryKey,
  pub state: QueryState,
  /// Last time the query was read or written
  pub last_used_at: DateTime<Utc>,
}

impl CachedQuery {
  /// Whether `stale_time` has fully elapsed since the data resolved.
  ///
  /// Age is measured from `data_updated_at`, so restored data keeps its
  /// original age. Queries without data are always stale.
  pub fn is_stale_at(&self, stale_time: Duration, now: DateTime<Utc>) -> bool {
    if self.state.is_invalidated {
      return true;
    }
    match self.state.data_updated_at {
      Some(updated_at) if self.state.data.is_some() => now - updated_at >= stale_time,
      _ => true,
    }
  }
}

/// Change notification emitted after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  Added(QueryKey),
  Updated(QueryKey),
  Removed(QueryKey),
}

/// The in-memory query cache.
pub struct QueryCache {
  /// Queries in insertion order
  queries: Mutex<Vec<CachedQuery>>,
  events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      queries: Mutex::new(Vec::new()),
      events,
    }
  }

  /// Subscribe to change events from this point on.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<CachedQuery>> {
    // A panic mid-update leaves plain data behind; keep serving it.
    self.queries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, event: CacheEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }

  /// Apply `update` to the query at `key`, creating a pending one if needed.
  fn upsert(&self, key: &QueryKey, now: DateTime<Utc>, update: impl FnOnce(&mut QueryState)) {
    let event = {
      let mut queries = self.lock();
      match queries.iter_mut().find(|q| &q.key == key) {
        Some(query) => {
          update(&mut query.state);
          query.last_used_at = now;
          CacheEvent::Updated(key.clone())
        }
        None => {
          let mut state = QueryState::pending();
          update(&mut state);
          queries.push(CachedQuery {
            key: key.clone(),
            state,
            last_used_at: now,
          });
          CacheEvent::Added(key.clone())
        }
      }
    };
    self.emit(event);
  }

  /// Store resolved data for `key`, stamped with `updated_at`.
  ///
  /// `updated_at` is taken as given: restoring passes the original
  /// resolution time, not the current time.
  pub fn set_query_data(&self, key: &QueryKey, data: CacheValue, updated_at: DateTime<Utc>) {
    let now = Utc::now().max(updated_at);
    self.upsert(key, now, |state| {
      state.status = QueryStatus::Success;
      state.data = Some(data);
      state.data_updated_at = Some(updated_at);
      state.error = None;
      state.fetch_failure_count = 0;
      state.is_invalidated = false;
    });
  }

  /// Register a query that has not resolved yet. No-op if it already exists.
  pub fn ensure(&self, key: &QueryKey) {
    if self.contains(key) {
      return;
    }
    self.upsert(key, Utc::now(), |_| {});
  }

  /// Record a failed fetch. Previously resolved data is kept.
  pub fn set_error(&self, key: &QueryKey, error: impl Into<String>, failures: u32) {
    let error = error.into();
    let now = Utc::now();
    self.upsert(key, now, |state| {
      state.status = QueryStatus::Error;
      state.error = Some(error);
      state.error_updated_at = Some(now);
      state.fetch_failure_count = failures;
    });
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    self.lock().iter().any(|q| &q.key == key)
  }

  /// Get a copy of the query at `key`, marking it as used.
  pub fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
    let mut queries = self.lock();
    let query = queries.iter_mut().find(|q| &q.key == key)?;
    query.last_used_at = query.last_used_at.max(Utc::now());
    Some(query.clone())
  }

  /// Get the resolved data at `key`, if any.
  pub fn get_query_data(&self, key: &QueryKey) -> Option<CacheValue> {
    self.get(key).and_then(|q| q.state.data)
  }

  /// Copy of every tracked query, in insertion order.
  pub fn all(&self) -> Vec<CachedQuery> {
    self.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Mark every query under `prefix` stale. Returns how many were marked.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let keys: Vec<QueryKey> = {
      let mut queries = self.lock();
      queries
        .iter_mut()
        .filter(|q| q.key.starts_with(prefix))
        .map(|q| {
          q.state.is_invalidated = true;
          q.key.clone()
        })
        .collect()
    };
    let count = keys.len();
    for key in keys {
      self.emit(CacheEvent::Updated(key));
    }
    count
  }

  /// Drop every query under `prefix`. Returns how many were removed.
  pub fn remove(&self, prefix: &QueryKey) -> usize {
    let removed = self.remove_where(|q| q.key.starts_with(prefix));
    let count = removed.len();
    for key in removed {
      self.emit(CacheEvent::Removed(key));
    }
    count
  }

  /// Drop queries unused for longer than `gc_time` as of `now`.
  pub fn collect_garbage(&self, gc_time: Duration, now: DateTime<Utc>) -> usize {
    let removed = self.remove_where(|q| now - q.last_used_at > gc_time);
    let count = removed.len();
    for key in removed {
      self.emit(CacheEvent::Removed(key));
    }
    count
  }

  /// Drop everything.
  pub fn clear(&self) {
    let removed = self.remove_where(|_| true);
    for key in removed {
      self.emit(CacheEvent::Removed(key));
    }
  }

  fn remove_where(&self, mut predicate: impl FnMut(&CachedQuery) -> bool) -> Vec<QueryKey> {
    let mut queries = self.lock();
    let mut removed = Vec::new();
    queries.retain(|q| {
      if predicate(q) {
        removed.push(q.key.clone());
        false
      } else {
        true
      }
    });
    removed
  }
}
