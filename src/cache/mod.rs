//! In-memory query cache for offline-first data access.
//!
//! This module provides the process-wide cache that the rest of the crate
//! builds on:
//! - Keys are ordered segment lists compared by value
//! - Payloads are JSON-like values that may carry date/time leaves
//! - Every mutation is broadcast so persistence can follow along

mod key;
mod query_cache;
mod value;

pub use key::{KeySegment, QueryKey};
pub use query_cache::{CacheEvent, CachedQuery, QueryCache, QueryState, QueryStatus};
pub use value::CacheValue;
