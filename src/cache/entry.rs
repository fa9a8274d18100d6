//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// A stored value plus its optional absolute expiry.
///
/// The value is shared, never copied: cloning an entry clones the `Arc`.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The stored value
    value: Arc<V>,
    /// Expiration instant, None = no expiration
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// The expiry is computed once, here, relative to the current time.
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        Self::from_shared(Arc::new(value), ttl)
    }

    /// Creates an entry around an already shared value.
    pub fn from_shared(value: Arc<V>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        Self { value, expires_at }
    }

    /// Creates an entry with an explicit expiry instant.
    pub fn with_expiry(value: V, expires_at: Option<Instant>) -> Self {
        Self {
            value: Arc::new(value),
            expires_at,
        }
    }

    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    // == Is Valid ==
    /// Checks whether the entry may still be served.
    ///
    /// Boundary condition: an entry is valid only while the expiry is strictly
    /// in the future, so it is already invalid at the exact expiry instant.
    /// Re-evaluated on every call.
    pub fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(expires) => Instant::now() < expires,
            None => true,
        }
    }

    // == Time To Live ==
    /// Returns the remaining TTL, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has TTL and hasn't expired
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn into_value(self) -> Arc<V> {
        self.value
    }
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            expires_at: self.expires_at,
        }
    }
}
