//! Full save and restore cycle across two simulated app launches.

use barkeep::cache::{CacheValue, QueryCache, QueryKey};
use barkeep::client::{FetchSource, QueryClient};
use barkeep::keys::DrinkQueryKey;
use barkeep::network::NetworkStatus;
use barkeep::persist::{
  CachePersistence, DurableStore, LifecycleEvent, MemoryStore, PersistOutcome, PersistenceOptions,
  RestoreOutcome, SqliteStore, CACHE_KEY,
};
use chrono::{Duration, Utc};
use color_eyre::eyre::eyre;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn drink_list_key() -> QueryKey {
  DrinkQueryKey::DrinkList {
    user_id: "user-1".to_string(),
  }
  .into()
}

#[tokio::test]
async fn test_hidden_app_persists_and_next_launch_restores() {
  let temp_dir = TempDir::new().unwrap();
  let db_path = temp_dir.path().join("cache.db");
  let options = PersistenceOptions::default();
  let key = drink_list_key();

  // First launch: fetch online, then get backgrounded
  let resolved_at = {
    let store = Arc::new(SqliteStore::open_at(&db_path).unwrap());
    let cache = Arc::new(QueryCache::new());
    let persistence = CachePersistence::setup(Arc::clone(&cache), Arc::clone(&store), &options);
    assert_eq!(persistence.restore_outcome(), &RestoreOutcome::Absent);

    let client = QueryClient::new(Arc::clone(&cache), NetworkStatus::default());
    let result = client
      .fetch_query(&key, || async {
        Ok(CacheValue::object([("count", CacheValue::from(3i64))]))
      })
      .await
      .unwrap();
    assert_eq!(result.source, FetchSource::Network);

    let outcome = persistence.handle_lifecycle(LifecycleEvent::Hidden);
    assert!(matches!(outcome, Some(PersistOutcome::Written { entries: 1, .. })));

    let text = store.get(CACHE_KEY).unwrap().unwrap();
    let stored: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(stored["version"], "v1");
    assert_eq!(stored["queries"].as_array().unwrap().len(), 1);
    assert_eq!(stored["queries"][0]["queryKey"], json!(["drinks", "list", "user-1"]));
    assert_eq!(stored["queries"][0]["data"], json!({ "count": 3 }));
    let written_at = stored["timestamp"].as_i64().unwrap();
    assert!((Utc::now().timestamp_millis() - written_at).abs() < 5_000);

    persistence.shutdown();
    result.updated_at
  };

  // Second launch, offline: the journal renders from the snapshot
  let store = Arc::new(SqliteStore::open_at(&db_path).unwrap());
  let cache = Arc::new(QueryCache::new());
  let persistence = CachePersistence::setup(Arc::clone(&cache), store, &options);
  assert_eq!(persistence.restore_outcome().restored(), 1);

  let network = NetworkStatus::new(false);
  let client = QueryClient::new(Arc::clone(&cache), network);
  let result = client
    .fetch_query(&key, || async { Err(eyre!("no network")) })
    .await
    .unwrap();

  assert_eq!(result.data.get("count").and_then(CacheValue::as_i64), Some(3));
  assert_eq!(result.updated_at.timestamp_millis(), resolved_at.timestamp_millis());
  assert_ne!(result.source, FetchSource::Network);

  persistence.shutdown();
}

#[tokio::test]
async fn test_other_version_is_ignored_and_kept() {
  let store = Arc::new(MemoryStore::new());
  let stale_format = json!({
    "version": "v0",
    "timestamp": Utc::now().timestamp_millis(),
    "queries": [{ "queryKey": ["feed", "list"], "data": [], "dataUpdatedAt": 0 }]
  })
  .to_string();
  store.set(CACHE_KEY, &stale_format).unwrap();

  let cache = Arc::new(QueryCache::new());
  let persistence =
    CachePersistence::setup(Arc::clone(&cache), Arc::clone(&store), &PersistenceOptions::default());

  assert_eq!(
    persistence.restore_outcome(),
    &RestoreOutcome::VersionMismatch {
      found: "v0".to_string()
    }
  );
  assert!(cache.is_empty());
  assert_eq!(store.get(CACHE_KEY).unwrap(), Some(stale_format));
}

#[tokio::test]
async fn test_expired_snapshot_is_cleared() {
  let store = Arc::new(MemoryStore::new());
  let written_at = Utc::now() - Duration::hours(25);
  let old = json!({
    "version": "v1",
    "timestamp": written_at.timestamp_millis(),
    "queries": [{
      "queryKey": ["profile", "detail", "user-1"],
      "data": { "username": "hopfan" },
      "dataUpdatedAt": written_at.timestamp_millis()
    }]
  })
  .to_string();
  store.set(CACHE_KEY, &old).unwrap();

  let cache = Arc::new(QueryCache::new());
  let persistence =
    CachePersistence::setup(Arc::clone(&cache), Arc::clone(&store), &PersistenceOptions::default());

  assert!(matches!(
    persistence.restore_outcome(),
    RestoreOutcome::Expired { .. }
  ));
  assert!(cache.is_empty());
  assert_eq!(store.get(CACHE_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_dates_survive_a_restart() {
  let store = Arc::new(MemoryStore::new());
  let options = PersistenceOptions::default();
  let key: QueryKey = DrinkQueryKey::DrinkDetail {
    id: "d-42".to_string(),
  }
  .into();

  let first = Arc::new(QueryCache::new());
  let persistence = CachePersistence::setup(Arc::clone(&first), Arc::clone(&store), &options);
  let data = CacheValue::from_serialize(&json!({
    "name": "Pliny the Elder",
    "createdAt": "2024-03-01T18:30:00.000Z",
    "note": "2024-03-01 was a good day"
  }))
  .unwrap();
  first.set_query_data(&key, data, Utc::now());
  persistence.shutdown();

  let second = Arc::new(QueryCache::new());
  let persistence = CachePersistence::setup(Arc::clone(&second), store, &options);
  let restored = second.get_query_data(&key).unwrap();

  let created_at = restored.get("createdAt").and_then(CacheValue::as_datetime).unwrap();
  assert_eq!(created_at.to_rfc3339(), "2024-03-01T18:30:00+00:00");
  assert_eq!(
    restored.get("note").and_then(CacheValue::as_str),
    Some("2024-03-01 was a good day")
  );
  persistence.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_is_written_once() {
  let store = Arc::new(MemoryStore::new());
  let cache = Arc::new(QueryCache::new());
  let persistence =
    CachePersistence::setup(Arc::clone(&cache), Arc::clone(&store), &PersistenceOptions::default());

  for user in ["a", "b", "c"] {
    let key: QueryKey = DrinkQueryKey::ProfileDetail {
      user_id: user.to_string(),
    }
    .into();
    cache.set_query_data(&key, CacheValue::from(user), Utc::now());
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
  }

  // Last change landed at t=2s; the write is due at t=7s
  tokio::time::sleep(std::time::Duration::from_secs(3)).await;
  assert_eq!(store.write_count(), 0);

  tokio::time::sleep(std::time::Duration::from_secs(3)).await;
  assert_eq!(store.write_count(), 1);

  let text = store.get(CACHE_KEY).unwrap().unwrap();
  let stored: serde_json::Value = serde_json::from_str(&text).unwrap();
  assert_eq!(stored["queries"].as_array().unwrap().len(), 3);
}
