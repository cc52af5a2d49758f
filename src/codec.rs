//! JSON codec for cached values.
//!
//! Dates are written as ISO-8601 strings. On the way back in, any string in a
//! payload that looks like an ISO-8601 date-time *and* parses to a real instant
//! becomes a [`CacheValue::DateTime`] again. There is no type tag: a plain
//! string that happens to match is upgraded too.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::LazyLock;

use crate::cache::CacheValue;

/// Four-digit year, month, day, `T`, hour, minute, second. Anything may follow.
static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}")
    .expect("ISO date pattern is valid")
});

/// Serialize a value to JSON text.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  serde_json::to_string(value).map_err(|e| eyre!("Failed to encode cache data: {}", e))
}

/// Parse JSON text. Payload values decode with date revival.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
  serde_json::from_str(text).map_err(|e| eyre!("Failed to decode cache data: {}", e))
}

/// Format a date the way it is stored in the durable slot.
///
/// UTC with a `Z` suffix and only as many fractional digits as the instant
/// needs, so decoding gives back the identical instant.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Try to read a string as a date-time.
///
/// Returns `None` unless the string matches the ISO pattern and names a real
/// calendar instant. Strings without an offset are taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  if !ISO_DATE_RE.is_match(s) {
    return None;
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|naive| naive.and_utc())
}

/// Convert plain JSON into a cache value as-is. Strings stay strings.
pub fn from_json(json: serde_json::Value) -> CacheValue {
  use serde_json::Value;

  match json {
    Value::Null => CacheValue::Null,
    Value::Bool(b) => CacheValue::Bool(b),
    Value::Number(n) => CacheValue::Number(n),
    Value::String(s) => CacheValue::String(s),
    Value::Array(items) => CacheValue::Array(items.into_iter().map(from_json).collect()),
    Value::Object(map) => {
      CacheValue::Object(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
    }
  }
}

/// Convert decoded JSON into a cache value, reviving date strings.
///
/// Only the decode path uses this; live values go through [`from_json`].
pub fn revive(json: serde_json::Value) -> CacheValue {
  use serde_json::Value;

  match json {
    Value::Null => CacheValue::Null,
    Value::Bool(b) => CacheValue::Bool(b),
    Value::Number(n) => CacheValue::Number(n),
    Value::String(s) => match parse_datetime(&s) {
      Some(dt) => CacheValue::DateTime(dt),
      None => CacheValue::String(s),
    },
    Value::Array(items) => CacheValue::Array(items.into_iter().map(revive).collect()),
    Value::Object(map) => CacheValue::Object(map.into_iter().map(|(k, v)| (k, revive(v))).collect()),
  }
}

/// Convert a cache value into plain JSON, formatting dates as strings.
pub fn to_json(value: &CacheValue) -> serde_json::Value {
  use serde_json::Value;

  match value {
    CacheValue::Null => Value::Null,
    CacheValue::Bool(b) => Value::Bool(*b),
    CacheValue::Number(n) => Value::Number(n.clone()),
    CacheValue::String(s) => Value::String(s.clone()),
    CacheValue::DateTime(dt) => Value::String(format_datetime(dt)),
    CacheValue::Array(items) => Value::Array(items.iter().map(to_json).collect()),
    CacheValue::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), to_json(v)))
        .collect(),
    ),
  }
}

impl Serialize for CacheValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match self {
      CacheValue::Null => serializer.serialize_unit(),
      CacheValue::Bool(b) => serializer.serialize_bool(*b),
      CacheValue::Number(n) => n.serialize(serializer),
      CacheValue::String(s) => serializer.serialize_str(s),
      CacheValue::DateTime(dt) => serializer.serialize_str(&format_datetime(dt)),
      CacheValue::Array(items) => serializer.collect_seq(items),
      CacheValue::Object(map) => serializer.collect_map(map),
    }
  }
}

impl<'de> Deserialize<'de> for CacheValue {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    serde_json::Value::deserialize(deserializer).map(revive)
  }
}
