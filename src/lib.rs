//! Offline-first query cache for the Barkeeply drink journal.
//!
//! Fetched server data lives in a [`cache::QueryCache`] keyed by
//! [`cache::QueryKey`]. The [`persist`] module snapshots that cache into
//! durable storage and seeds it back on the next start, so the journal
//! renders immediately, even without a connection.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod keys;
pub mod logging;
pub mod network;
pub mod persist;
