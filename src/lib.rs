//! TTL Cache - A process-local concurrent cache with per-entry expiry
//!
//! Provides get/set, compute-if-absent with sync and async producers, atomic
//! upsert, removal, and a background sweeper that deletes expired entries.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheEntry, CacheStore};
pub use config::Config;
pub use error::{CacheError, Result};
