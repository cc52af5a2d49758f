//! Query keys: ordered segment lists identifying one cached remote resource.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One segment of a query key.
///
/// Segments are primitives only. They serialize as bare JSON values so a key
/// reads as a plain array (`["drinks", "list", "user-1"]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
  Null,
  Bool(bool),
  Number(serde_json::Number),
  Str(String),
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Str(value.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(value: String) -> Self {
    KeySegment::Str(value)
  }
}

impl From<&String> for KeySegment {
  fn from(value: &String) -> Self {
    KeySegment::Str(value.clone())
  }
}

impl From<bool> for KeySegment {
  fn from(value: bool) -> Self {
    KeySegment::Bool(value)
  }
}

impl From<i64> for KeySegment {
  fn from(value: i64) -> Self {
    KeySegment::Number(value.into())
  }
}

impl From<u64> for KeySegment {
  fn from(value: u64) -> Self {
    KeySegment::Number(value.into())
  }
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Null => write!(f, "null"),
      KeySegment::Bool(b) => write!(f, "{}", b),
      KeySegment::Number(n) => write!(f, "{}", n),
      KeySegment::Str(s) => write!(f, "{:?}", s),
    }
  }
}

/// Ordered identifier for one logical remote resource.
///
/// Keys compare by deep equality of their segments. Segment order encodes the
/// resource hierarchy (`["drinks"]` is the parent of `["drinks", "list", id]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new(segments: Vec<KeySegment>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether `prefix` matches the leading segments of this key.
  ///
  /// An empty prefix matches every key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable hex SHA-256 of the canonical JSON form, for log lines.
  pub fn fingerprint(&self) -> String {
    let canonical = serde_json::to_string(&self.0).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", segment)?;
    }
    write!(f, "]")
  }
}

impl<S: Into<KeySegment>> FromIterator<S> for QueryKey {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

impl<S: Into<KeySegment>, const N: usize> From<[S; N]> for QueryKey {
  fn from(segments: [S; N]) -> Self {
    segments.into_iter().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keys_compare_by_segments() {
    let a = QueryKey::from(["drinks", "list", "user-1"]);
    let b: QueryKey = vec!["drinks".to_string(), "list".into(), "user-1".into()]
      .into_iter()
      .collect();
    assert_eq!(a, b);
    assert_ne!(a, QueryKey::from(["drinks", "user-1", "list"]));
  }

  #[test]
  fn test_serializes_as_plain_array() {
    let key = QueryKey::new(vec![
      "collections".into(),
      KeySegment::from(7u64),
      true.into(),
      KeySegment::Null,
    ]);
    let json = serde_json::to_string(&key).unwrap();
    assert_eq!(json, r#"["collections",7,true,null]"#);

    let back: QueryKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, key);
  }

  #[test]
  fn test_date_like_segment_stays_a_string() {
    let key: QueryKey = serde_json::from_str(r#"["feed","2024-05-01T10:00:00Z"]"#).unwrap();
    assert_eq!(
      key.segments()[1],
      KeySegment::Str("2024-05-01T10:00:00Z".to_string())
    );
  }

  #[test]
  fn test_starts_with() {
    let key = QueryKey::from(["drinks", "detail", "abc"]);
    assert!(key.starts_with(&QueryKey::from(["drinks"])));
    assert!(key.starts_with(&QueryKey::new(Vec::new())));
    assert!(!key.starts_with(&QueryKey::from(["collections"])));
    assert!(!QueryKey::from(["drinks"]).starts_with(&key));
  }

  #[test]
  fn test_fingerprint_is_stable() {
    let a = QueryKey::from(["profile", "detail", "u1"]);
    let b = QueryKey::from(["profile", "detail", "u1"]);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint().len(), 64);
    assert_ne!(a.fingerprint(), QueryKey::from(["profile", "detail", "u2"]).fingerprint());
  }

  #[test]
  fn test_display() {
    let key = QueryKey::new(vec!["follows".into(), KeySegment::from(3i64)]);
    assert_eq!(key.to_string(), r#"["follows", 3]"#);
  }
}
