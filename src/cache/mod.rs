//! Cache Module
//!
//! Provides a concurrent in-memory cache with per-entry TTL expiration.

mod entry;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use store::CacheStore;

pub(crate) use store::sweep;
