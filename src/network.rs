//! Network reachability tracking.

use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the reachability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reachability {
  pub online: bool,
  /// Went offline at some point and has not come back yet
  pub was_offline: bool,
}

/// Shared online/offline flag.
///
/// Cloning gives another handle to the same state.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
  tx: Arc<watch::Sender<Reachability>>,
}

impl Default for NetworkStatus {
  fn default() -> Self {
    Self::new(true)
  }
}

impl NetworkStatus {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(Reachability {
      online,
      was_offline: !online,
    });
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    self.tx.borrow().online
  }

  pub fn was_offline(&self) -> bool {
    self.tx.borrow().was_offline
  }

  /// Record a reachability change. Repeating the current state is a no-op.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|state| {
      if state.online == online {
        return false;
      }
      state.online = online;
      state.was_offline = !online;
      true
    });
    if !changed {
      return;
    }
    if online {
      tracing::info!("Network reachable");
    } else {
      tracing::info!("Network unreachable, serving cached data");
    }
  }

  /// Watch for reachability changes.
  pub fn subscribe(&self) -> watch::Receiver<Reachability> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions() {
    let status = NetworkStatus::default();
    assert!(status.is_online());
    assert!(!status.was_offline());

    status.set_online(false);
    assert!(!status.is_online());
    assert!(status.was_offline());

    status.set_online(true);
    assert!(status.is_online());
    assert!(!status.was_offline());
  }

  #[tokio::test]
  async fn test_subscribers_see_changes_only() {
    let status = NetworkStatus::new(true);
    let mut rx = status.subscribe();

    status.set_online(true);
    assert!(!rx.has_changed().unwrap());

    status.set_online(false);
    rx.changed().await.unwrap();
    assert!(!rx.borrow_and_update().online);
  }

  #[test]
  fn test_clones_share_state() {
    let status = NetworkStatus::new(true);
    let other = status.clone();
    other.set_online(false);
    assert!(!status.is_online());
  }
}
