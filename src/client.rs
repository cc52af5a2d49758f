//! Query client that orchestrates the cache with network fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{CacheValue, QueryCache, QueryKey};
use crate::network::NetworkStatus;

/// Defaults applied to every query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// How long resolved data is served without revalidation
  pub stale_time: Duration,
  /// How long unused data stays in memory
  pub gc_time: Duration,
  /// Retries after the first failed attempt
  pub retry: u32,
  /// First retry delay; doubles on each further retry
  pub retry_base_delay: std::time::Duration,
  /// Upper bound for a single retry delay
  pub retry_max_delay: std::time::Duration,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::minutes(5),
      gc_time: Duration::hours(24),
      retry: 3,
      retry_base_delay: std::time::Duration::from_secs(1),
      retry_max_delay: std::time::Duration::from_secs(30),
    }
  }
}

impl QueryOptions {
  /// Delay before retry number `failures` (1-based).
  fn retry_delay(&self, failures: u32) -> std::time::Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    self
      .retry_base_delay
      .saturating_mul(factor)
      .min(self.retry_max_delay)
  }
}

/// Where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale because the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

/// Result of a fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
  pub data: T,
  pub source: FetchSource,
  /// When the data was resolved
  pub updated_at: DateTime<Utc>,
}

impl<T> FetchResult<T> {
  fn map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<FetchResult<U>> {
    Ok(FetchResult {
      data: f(self.data)?,
      source: self.source,
      updated_at: self.updated_at,
    })
  }
}

/// Offline-first access to remote data through the query cache.
///
/// Cloning gives another handle to the same cache and network status.
#[derive(Clone)]
pub struct QueryClient {
  cache: Arc<QueryCache>,
  network: NetworkStatus,
  options: QueryOptions,
}

impl QueryClient {
  pub fn new(cache: Arc<QueryCache>, network: NetworkStatus) -> Self {
    Self {
      cache,
      network,
      options: QueryOptions::default(),
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }

  pub fn cache(&self) -> &Arc<QueryCache> {
    &self.cache
  }

  pub fn network(&self) -> &NetworkStatus {
    &self.network
  }

  pub fn options(&self) -> &QueryOptions {
    &self.options
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Fresh cached data is returned without calling `fetcher`
  /// 2. Stale or missing data is fetched when online, with retries
  /// 3. Offline, or after every retry failed, cached data is served as-is
  /// 4. With nothing cached, a failure is returned to the caller
  pub async fn fetch_query<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<FetchResult<CacheValue>>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<CacheValue>>,
  {
    let now = Utc::now();

    let cached = self.cache.get(key).and_then(|query| {
      let fresh = !query.is_stale_at(self.options.stale_time, now);
      match (query.state.data, query.state.data_updated_at) {
        (Some(data), Some(updated_at)) => Some((data, updated_at, fresh)),
        _ => None,
      }
    });

    if let Some((data, updated_at, fresh)) = cached {
      if fresh {
        return Ok(FetchResult {
          data,
          source: FetchSource::CacheFresh,
          updated_at,
        });
      }

      if !self.network.is_online() {
        tracing::debug!(%key, "Offline, serving stale cache");
        return Ok(FetchResult {
          data,
          source: FetchSource::Offline,
          updated_at,
        });
      }

      return match self.fetch_with_retry(key, &fetcher).await {
        Ok(result) => Ok(result),
        Err(e) => {
          tracing::debug!(%key, error = %e, "Fetch failed, serving stale cache");
          Ok(FetchResult {
            data,
            source: FetchSource::CacheStale,
            updated_at,
          })
        }
      };
    }

    // No cache, must fetch from network
    self.cache.ensure(key);
    if !self.network.is_online() {
      return Err(eyre!("Offline and nothing cached for {}", key));
    }
    self.fetch_with_retry(key, &fetcher).await
  }

  /// Typed variant of [`fetch_query`](Self::fetch_query).
  pub async fn fetch_as<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<FetchResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let result = self
      .fetch_query(key, || {
        let fut = fetcher();
        async move { CacheValue::from_serialize(&fut.await?) }
      })
      .await?;

    result.map(|data| data.deserialize_into())
  }

  /// Run `fetcher` until it succeeds, the retry budget runs out, or the
  /// network goes away. Stores the outcome in the cache.
  async fn fetch_with_retry<F, Fut>(&self, key: &QueryKey, fetcher: &F) -> Result<FetchResult<CacheValue>>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<CacheValue>>,
  {
    let mut failures = 0u32;

    loop {
      match fetcher().await {
        Ok(data) => {
          let updated_at = Utc::now();
          self.cache.set_query_data(key, data.clone(), updated_at);
          return Ok(FetchResult {
            data,
            source: FetchSource::Network,
            updated_at,
          });
        }
        Err(e) => {
          failures += 1;
          let exhausted = failures > self.options.retry;
          if exhausted || !self.network.is_online() {
            tracing::warn!(
              %key,
              key_hash = %key.fingerprint(),
              failures,
              error = %e,
              "Query failed"
            );
            self.cache.set_error(key, e.to_string(), failures);
            return Err(e);
          }

          let delay = self.options.retry_delay(failures);
          tracing::debug!(
            %key,
            key_hash = %key.fingerprint(),
            failures,
            delay_ms = delay.as_millis() as u64,
            "Retrying query"
          );
          tokio::time::sleep(delay).await;
        }
      }
    }
  }

  /// Store data for `key` as if it had just been fetched.
  pub fn set_query_data(&self, key: &QueryKey, data: CacheValue) {
    self.cache.set_query_data(key, data, Utc::now());
  }

  pub fn get_query_data(&self, key: &QueryKey) -> Option<CacheValue> {
    self.cache.get_query_data(key)
  }

  /// Whether the data at `key` needs revalidation. Missing data counts as stale.
  pub fn is_stale(&self, key: &QueryKey) -> bool {
    self
      .cache
      .get(key)
      .map(|q| q.is_stale_at(self.options.stale_time, Utc::now()))
      .unwrap_or(true)
  }

  /// Mark everything under `prefix` for revalidation on next fetch.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
    self.cache.invalidate(prefix)
  }

  pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
    self.cache.remove(prefix)
  }

  /// Spawn a task that marks every query stale when the network comes back,
  /// so data cached while offline is revalidated on its next fetch.
  ///
  /// The task ends once every [`NetworkStatus`] handle is dropped.
  pub fn revalidate_on_reconnect(&self) -> JoinHandle<()> {
    let mut changes = self.network.subscribe();
    let cache = Arc::clone(&self.cache);

    tokio::spawn(async move {
      let mut previous = *changes.borrow_and_update();
      while changes.changed().await.is_ok() {
        let current = *changes.borrow_and_update();
        if current.online && previous.was_offline {
          let marked = cache.invalidate(&QueryKey::new(Vec::new()));
          tracing::info!(marked, "Back online, revalidating cached queries");
        }
        previous = current;
      }
    })
  }

  /// Drop entries unused for longer than the gc time.
  pub fn collect_garbage(&self) -> usize {
    let removed = self.cache.collect_garbage(self.options.gc_time, Utc::now());
    if removed > 0 {
      tracing::debug!(removed, "Collected unused queries");
    }
    removed
  }
}
