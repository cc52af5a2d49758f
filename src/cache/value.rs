//! Cached data payloads.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

use crate::codec;

/// A structured value held in the query cache.
///
/// This is JSON plus one extra leaf: date/time values. Dates survive a trip
/// through the durable slot as dates, not as strings (see [`crate::codec`]).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheValue {
  #[default]
  Null,
  Bool(bool),
  Number(serde_json::Number),
  String(String),
  DateTime(DateTime<Utc>),
  Array(Vec<CacheValue>),
  Object(BTreeMap<String, CacheValue>),
}

impl CacheValue {
  /// Build an object from field/value pairs.
  pub fn object<K, I>(fields: I) -> Self
  where
    K: Into<String>,
    I: IntoIterator<Item = (K, CacheValue)>,
  {
    CacheValue::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }

  /// Convert any serializable value into a payload.
  ///
  /// Goes through JSON without date revival: date fields become their string
  /// form and every string is kept verbatim. Dates come back as
  /// [`CacheValue::DateTime`] only when a snapshot is decoded.
  pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
    let json = serde_json::to_value(value)
      .map_err(|e| eyre!("Failed to convert value for caching: {}", e))?;
    Ok(codec::from_json(json))
  }

  /// Convert this payload into a typed value.
  pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_value(codec::to_json(self))
      .map_err(|e| eyre!("Failed to convert cached value: {}", e))
  }

  pub fn is_null(&self) -> bool {
    matches!(self, CacheValue::Null)
  }

  /// Look up a field of an object.
  pub fn get(&self, field: &str) -> Option<&CacheValue> {
    match self {
      CacheValue::Object(map) => map.get(field),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      CacheValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      CacheValue::Number(n) => n.as_i64(),
      _ => None,
    }
  }

  pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
    match self {
      CacheValue::DateTime(dt) => Some(*dt),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[CacheValue]> {
    match self {
      CacheValue::Array(items) => Some(items),
      _ => None,
    }
  }
}

impl From<bool> for CacheValue {
  fn from(value: bool) -> Self {
    CacheValue::Bool(value)
  }
}

impl From<i64> for CacheValue {
  fn from(value: i64) -> Self {
    CacheValue::Number(value.into())
  }
}

impl From<u64> for CacheValue {
  fn from(value: u64) -> Self {
    CacheValue::Number(value.into())
  }
}

impl From<f64> for CacheValue {
  /// Non-finite floats have no JSON form and become `Null`.
  fn from(value: f64) -> Self {
    serde_json::Number::from_f64(value)
      .map(CacheValue::Number)
      .unwrap_or(CacheValue::Null)
  }
}

impl From<&str> for CacheValue {
  fn from(value: &str) -> Self {
    CacheValue::String(value.to_string())
  }
}

impl From<String> for CacheValue {
  fn from(value: String) -> Self {
    CacheValue::String(value)
  }
}

impl From<DateTime<Utc>> for CacheValue {
  fn from(value: DateTime<Utc>) -> Self {
    CacheValue::DateTime(value)
  }
}

impl<T: Into<CacheValue>> From<Vec<T>> for CacheValue {
  fn from(values: Vec<T>) -> Self {
    CacheValue::Array(values.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<CacheValue>> From<Option<T>> for CacheValue {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(CacheValue::Null)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Drink {
    id: String,
    name: String,
    rating: u8,
    created_at: DateTime<Utc>,
    notes: Option<String>,
  }

  fn sample_drink() -> Drink {
    Drink {
      id: "d-1".to_string(),
      name: "Hazy IPA".to_string(),
      rating: 4,
      created_at: Utc.with_ymd_and_hms(2024, 3, 9, 18, 45, 12).unwrap(),
      notes: None,
    }
  }

  #[test]
  fn test_from_serialize_keeps_strings_verbatim() {
    let value = CacheValue::from_serialize(&sample_drink()).unwrap();
    assert_eq!(
      value.get("created_at").and_then(CacheValue::as_str),
      Some("2024-03-09T18:45:12Z")
    );
    assert_eq!(value.get("name").and_then(CacheValue::as_str), Some("Hazy IPA"));
    assert!(value.get("notes").unwrap().is_null());
  }

  #[test]
  fn test_deserialize_into_typed_struct() {
    let value = CacheValue::from_serialize(&vec![sample_drink()]).unwrap();
    let drinks: Vec<Drink> = value.deserialize_into().unwrap();
    assert_eq!(drinks, vec![sample_drink()]);
  }

  #[test]
  fn test_restored_dates_still_deserialize_into_typed_fields() {
    let text = codec::encode(&CacheValue::from_serialize(&sample_drink()).unwrap()).unwrap();
    let restored: CacheValue = codec::decode(&text).unwrap();
    assert!(matches!(restored.get("created_at"), Some(CacheValue::DateTime(_))));
    assert_eq!(restored.deserialize_into::<Drink>().unwrap(), sample_drink());
  }

  #[test]
  fn test_from_serialize_rejects_non_string_map_keys() {
    let mut map = std::collections::HashMap::new();
    map.insert(vec![1u8], "x");
    assert!(CacheValue::from_serialize(&map).is_err());
  }

  #[test]
  fn test_non_finite_float_becomes_null() {
    assert!(CacheValue::from(f64::NAN).is_null());
    assert_eq!(CacheValue::from(2.5).as_i64(), None);
  }

  #[test]
  fn test_object_builder() {
    let value = CacheValue::object([("count", CacheValue::from(3i64))]);
    assert_eq!(value.get("count").and_then(CacheValue::as_i64), Some(3));
    assert_eq!(value.get("missing"), None);
  }
}
